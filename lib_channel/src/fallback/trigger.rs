//! # Fallback Trigger
//!
//! Produces the moments at which a channel checks whether it should switch
//! back to its preferred endpoint.
//!
//! Interval detection is a plain deadline that the channel worker sleeps on,
//! so it follows tokio's clock (and can be driven with paused time in tests).
//! Schedule detection runs on a `tokio-cron-scheduler` job that posts a
//! `DetectionTick` into the worker's queue. Every `arm` bumps a generation
//! counter and ticks from an older generation are dropped, so a job removed
//! while it was firing cannot cause a stray check.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_cron_scheduler::{JobBuilder, JobScheduler};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ChannelError, ValidationError};
use crate::fallback::policy::{DetectionMode, FallbackPolicy};

/// # Cron Schedule
///
/// A validated 5-field cron expression (`minute hour day month weekday`),
/// evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
}

impl CronSchedule {
    /// Parses and validates `expression`.
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ValidationError::InvalidSchedule {
                schedule: expression.to_string(),
                reason: format!(
                    "expected 5 fields (minute hour day month weekday), found {}",
                    fields.len()
                ),
            });
        }

        let schedule = Self {
            expression: fields.join(" "),
        };
        JobBuilder::new()
            .with_timezone(Utc)
            .with_cron_job_type()
            .with_schedule(schedule.with_seconds().as_str())
            .map_err(|e| ValidationError::InvalidSchedule {
                schedule: expression.to_string(),
                reason: format!("{:?}", e),
            })?;
        Ok(schedule)
    }

    /// The normalized 5-field expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    // The scheduler works with a leading seconds field.
    fn with_seconds(&self) -> String {
        format!("0 {}", self.expression)
    }
}

/// A schedule occurrence, delivered to the channel worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionTick {
    generation: u64,
}

#[derive(Debug)]
enum ArmedTimer {
    Interval { deadline: Instant, period: Duration },
    Schedule { job_id: Uuid },
}

/// # Fallback Trigger
///
/// Owns the detection timer of one channel. The worker arms it when the
/// channel comes up, disarms it when the connection is lost, and replaces the
/// whole trigger when a new policy is installed.
pub struct FallbackTrigger {
    mode: DetectionMode,
    armed: Option<ArmedTimer>,
    generation: u64,
    scheduler: Option<JobScheduler>,
}

impl FallbackTrigger {
    /// Creates an unarmed trigger for `mode`.
    pub fn new(mode: DetectionMode) -> Self {
        Self {
            mode,
            armed: None,
            generation: 0,
            scheduler: None,
        }
    }

    /// Creates an unarmed trigger for the detection mode `policy` asks for.
    pub fn from_policy(policy: &FallbackPolicy) -> Result<Self, ValidationError> {
        Ok(Self::new(policy.detection_mode()?))
    }

    /// The detection mode this trigger runs.
    pub fn mode(&self) -> &DetectionMode {
        &self.mode
    }

    /// Whether a timer or job is currently pending.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Starts detection. Any previous timer is cancelled first. In manual
    /// mode this only cancels.
    pub async fn arm(&mut self, ticks: &UnboundedSender<DetectionTick>) -> Result<(), ChannelError> {
        self.disarm().await;
        self.generation += 1;

        match self.mode.clone() {
            DetectionMode::Manual => {}
            DetectionMode::Interval(period) => {
                self.armed = Some(ArmedTimer::Interval {
                    deadline: Instant::now() + period,
                    period,
                });
            }
            DetectionMode::Schedule(schedule) => {
                let job_id = self.add_schedule_job(&schedule, ticks.clone()).await?;
                debug!(
                    "Detection schedule '{}' armed as job {}",
                    schedule.expression(),
                    job_id
                );
                self.armed = Some(ArmedTimer::Schedule { job_id });
            }
        }
        Ok(())
    }

    /// Cancels the pending timer, if any.
    pub async fn disarm(&mut self) {
        match self.armed.take() {
            Some(ArmedTimer::Schedule { job_id }) => {
                if let Some(scheduler) = &self.scheduler {
                    if let Err(e) = scheduler.remove(&job_id).await {
                        warn!("Failed to remove detection job {}: {:?}", job_id, e);
                    }
                }
            }
            Some(ArmedTimer::Interval { .. }) | None => {}
        }
    }

    /// Deadline of the pending interval check.
    pub fn interval_deadline(&self) -> Option<Instant> {
        match &self.armed {
            Some(ArmedTimer::Interval { deadline, .. }) => Some(*deadline),
            _ => None,
        }
    }

    /// Schedules the next interval check one period from now. Called after an
    /// interval check fired.
    pub fn rearm_interval(&mut self) {
        if let Some(ArmedTimer::Interval { deadline, period }) = &mut self.armed {
            *deadline = Instant::now() + *period;
        }
    }

    /// Whether `tick` came from the job this trigger has armed right now.
    pub fn accepts(&self, tick: &DetectionTick) -> bool {
        matches!(self.armed, Some(ArmedTimer::Schedule { .. })) && tick.generation == self.generation
    }

    /// The tick the currently armed job would deliver.
    #[cfg(test)]
    pub(crate) fn current_tick(&self) -> DetectionTick {
        DetectionTick {
            generation: self.generation,
        }
    }

    /// Wall-clock time of the next check.
    pub async fn next_fire(&self) -> Option<DateTime<Utc>> {
        match &self.armed {
            Some(ArmedTimer::Interval { deadline, .. }) => {
                let left = deadline.saturating_duration_since(Instant::now());
                chrono::Duration::from_std(left).ok().map(|d| Utc::now() + d)
            }
            Some(ArmedTimer::Schedule { job_id }) => {
                let mut scheduler = self.scheduler.clone()?;
                match scheduler.next_tick_for_job(*job_id).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Could not read next tick of job {}: {:?}", job_id, e);
                        None
                    }
                }
            }
            None => None,
        }
    }

    /// Time left until the next check; zero when nothing is armed.
    pub async fn remaining(&self) -> Duration {
        if let Some(deadline) = self.interval_deadline() {
            return deadline.saturating_duration_since(Instant::now());
        }
        self.next_fire()
            .await
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Disarms and stops the scheduler. The trigger can be armed again
    /// afterwards; a new scheduler is started on demand.
    pub async fn shutdown(&mut self) {
        self.disarm().await;
        if let Some(mut scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.shutdown().await {
                warn!("Detection scheduler did not shut down cleanly: {:?}", e);
            }
        }
    }

    async fn add_schedule_job(
        &mut self,
        schedule: &CronSchedule,
        ticks: UnboundedSender<DetectionTick>,
    ) -> Result<Uuid, ChannelError> {
        let scheduler = self.scheduler().await?;
        let generation = self.generation;

        let job = JobBuilder::new()
            .with_timezone(Utc)
            .with_cron_job_type()
            .with_schedule(schedule.with_seconds().as_str())
            .map_err(scheduler_error)?
            .with_run_async(Box::new(move |_uuid, _scheduler| {
                let ticks = ticks.clone();
                Box::pin(async move {
                    // The worker is gone when the send fails; nothing to do.
                    let _ = ticks.send(DetectionTick { generation });
                })
            }))
            .build()
            .map_err(scheduler_error)?;

        scheduler.add(job).await.map_err(scheduler_error)
    }

    async fn scheduler(&mut self) -> Result<JobScheduler, ChannelError> {
        if let Some(scheduler) = &self.scheduler {
            return Ok(scheduler.clone());
        }
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        scheduler.start().await.map_err(scheduler_error)?;
        self.scheduler = Some(scheduler.clone());
        Ok(scheduler)
    }
}

fn scheduler_error(e: impl std::fmt::Debug) -> ChannelError {
    ChannelError::Scheduler(format!("{:?}", e))
}
