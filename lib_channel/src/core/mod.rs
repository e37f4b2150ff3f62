//! # Core Channel Module
//!
//! The channel state machine and everything it drives. A channel is one
//! logical connection to a set of redundant endpoints; this module keeps it
//! connected, retries with backoff when it is not, and switches it back to
//! its preferred endpoint when the fallback trigger says so.
//!
//! ## Core Components:
//!
//! - **`config`**: `ChannelConfig`, the serde-backed settings a channel is
//!   started from.
//!
//! - **`state`**: `ChannelState`, the `ChannelEvent` notifications and the
//!   `ChannelInfo` snapshot.
//!
//! - **`reconnect`**: `ReconnectScheduler`, exponential backoff bounded by an
//!   attempt limit.
//!
//! - **`channel`**: `ChannelBuilder` and the cloneable `Channel` handle the
//!   application talks to.
//!
//! - **`worker`**: the per-channel task that owns the selector, the trigger
//!   and the reconnect timing, and reacts to commands, I/O events and timers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Builder and public handle.
pub mod channel;
/// Channel settings.
pub mod config;
/// Reconnect backoff.
pub mod reconnect;
/// Lifecycle state, notifications and info snapshots.
pub mod state;
mod worker;

// --- Public API Re-exports ---
pub use channel::{Channel, ChannelBuilder, ChannelEvents};
pub use config::ChannelConfig;
pub use reconnect::{ReconnectDecision, ReconnectScheduler};
pub use state::{
    ChannelEvent, ChannelInfo, ChannelState, EndpointStatus, PreferredHostInfo, TransportInfo,
};
