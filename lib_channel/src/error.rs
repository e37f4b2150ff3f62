//! # Channel Errors
//!
//! Every failure the channel can report, split the same way callers have to
//! react to them:
//!
//! - **validation** failures come back synchronously and never touch live state,
//! - **usage** failures mean the call makes no sense for the current configuration,
//! - **transport**, **timeout** and **discovery** failures are transient I/O problems,
//! - **attempt-limit** and **shutdown** failures are terminal.
//!
//! Errors are `Clone` because they travel inside `ChannelEvent`s from the worker
//! back to the application instead of being raised across task boundaries.

use thiserror::Error;

/// Errors raised while checking endpoint lists, policies and channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The preferred connection list index is below zero.
    #[error("Preferred host connection list index {0} must not be negative")]
    NegativePreferredIndex(i32),

    /// The preferred connection list index points past the end of the endpoint list.
    #[error("Preferred host connection list index {index} is out of range for {len} configured endpoint(s)")]
    PreferredIndexOutOfRange {
        /// The rejected index.
        index: i32,
        /// The number of configured endpoints.
        len: usize,
    },

    /// A channel needs at least one endpoint to connect to.
    #[error("Endpoint list must contain at least one endpoint")]
    EmptyEndpointList,

    /// The detection schedule is not a valid 5-field cron expression.
    #[error("Invalid detection schedule '{schedule}': {reason}")]
    InvalidSchedule {
        /// The rejected expression.
        schedule: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The reconnect delay bounds are inverted.
    #[error("Reconnect min delay ({min_ms} ms) is greater than max delay ({max_ms} ms)")]
    InvalidReconnectDelays {
        /// Configured minimum delay in milliseconds.
        min_ms: u64,
        /// Configured maximum delay in milliseconds.
        max_ms: u64,
    },

    /// A zero connection timeout would fail every connect before it starts.
    #[error("Connection init timeout must be greater than zero")]
    ZeroInitTimeout,

    /// An endpoint asks for session management but the channel has no discovery service.
    #[error("Endpoint {0} requires session management but no service discovery is configured")]
    MissingServiceDiscovery(String),
}

/// The error type returned by every public channel operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A policy or configuration value was rejected. No state was changed.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The operation is not valid for the channel's current configuration.
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Connecting to, reading from or writing to an endpoint failed.
    #[error("Transport error on {endpoint}: {reason}")]
    Transport {
        /// The endpoint involved, as `address:port`.
        endpoint: String,
        /// The underlying failure.
        reason: String,
    },

    /// Connection initialization did not finish in time.
    #[error("Connection to {endpoint} timed out after {timeout_ms} ms")]
    Timeout {
        /// The endpoint involved, as `address:port`.
        endpoint: String,
        /// The configured initialization timeout.
        timeout_ms: u64,
    },

    /// Service discovery could not resolve a session-managed endpoint.
    #[error("Service discovery failed for {endpoint}: {reason}")]
    Discovery {
        /// The endpoint that was being resolved.
        endpoint: String,
        /// The underlying failure.
        reason: String,
    },

    /// The reconnect attempt limit was reached; the channel is permanently down.
    #[error("Reconnect attempt limit of {limit} reached")]
    AttemptLimitExhausted {
        /// The configured attempt limit.
        limit: i32,
    },

    /// The cron scheduler behind schedule-based detection failed.
    #[error("Detection scheduler error: {0}")]
    Scheduler(String),

    /// The channel has no live connection to carry the request.
    #[error("Channel is not connected")]
    NotConnected,

    /// The channel was closed; no further operations are accepted.
    #[error("Channel has been shut down")]
    Shutdown,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChannelError>;
