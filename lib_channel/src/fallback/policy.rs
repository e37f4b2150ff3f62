//! # Preferred Host Policy
//!
//! The user-facing fallback configuration and its validation. A policy is a
//! plain value: building the selector and the detection timer from it happens
//! elsewhere, but both go through `FallbackPolicy::validate` first so a bad
//! policy is rejected before anything is built.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoints::EndpointList;
use crate::error::ValidationError;
use crate::fallback::trigger::CronSchedule;

/// # Fallback Policy
///
/// Preferred host options for a channel.
///
/// `connection_list_index` is signed on purpose: it arrives from configuration
/// files and live updates, and an out-of-range value must be reported, never
/// clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackPolicy {
    /// Turns preferred host selection and fallback on.
    pub enabled: bool,
    /// Index of the preferred endpoint in the channel's endpoint list.
    pub connection_list_index: i32,
    /// Seconds between detection checks, counted from the last time the
    /// channel came up. `0` disables interval detection.
    pub detection_interval: u64,
    /// 5-field cron expression (`minute hour day month weekday`). Takes
    /// precedence over `detection_interval` when non-empty.
    pub detection_schedule: String,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            connection_list_index: 0,
            detection_interval: 0,
            detection_schedule: String::new(),
        }
    }
}

/// How the channel decides when to check for a premature switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionMode {
    /// No automatic checks; only an explicit fallback request runs one.
    Manual,
    /// Check a fixed time after the channel came up, then every period.
    Interval(Duration),
    /// Check at every occurrence of a cron schedule.
    Schedule(CronSchedule),
}

impl FallbackPolicy {
    /// Checks the policy against the endpoint list it will run with and
    /// returns the preferred index as a list position.
    pub fn validate(&self, endpoints: &EndpointList) -> Result<usize, ValidationError> {
        let index = endpoints.check_index(self.connection_list_index)?;
        self.detection_mode()?;
        Ok(index)
    }

    /// Derives the detection mode. A non-empty schedule wins over the
    /// interval; a disabled policy never detects on its own.
    pub fn detection_mode(&self) -> Result<DetectionMode, ValidationError> {
        let schedule = self.detection_schedule.trim();
        if !schedule.is_empty() {
            let parsed = CronSchedule::parse(schedule)?;
            if self.enabled {
                return Ok(DetectionMode::Schedule(parsed));
            }
        }
        if !self.enabled || self.detection_interval == 0 {
            return Ok(DetectionMode::Manual);
        }
        Ok(DetectionMode::Interval(Duration::from_secs(
            self.detection_interval,
        )))
    }
}
