//! # Fallback Module
//!
//! Everything needed to move a healthy channel back to its preferred
//! endpoint without the application noticing a gap.
//!
//! ## Contained Modules:
//! - **`policy`**: `FallbackPolicy`, the user-facing preferred host options,
//!   and the `DetectionMode` derived from it.
//! - **`trigger`**: `FallbackTrigger`, the interval deadline or cron job that
//!   decides *when* a check runs.
//! - **`context`**: `FallbackContext`, the live/shadow property pair that
//!   keeps observers on the old connection while the new one is opened.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Shadowed channel properties and fallback phases.
pub mod context;
/// Preferred host policy and detection mode.
pub mod policy;
/// Interval and cron based detection timers.
pub mod trigger;

pub use context::{ChannelProps, FallbackContext, FallbackPhase, UserContext};
pub use policy::{DetectionMode, FallbackPolicy};
pub use trigger::{CronSchedule, DetectionTick, FallbackTrigger};
