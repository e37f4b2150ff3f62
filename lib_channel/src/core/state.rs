//! # Channel State and Notifications
//!
//! The externally visible lifecycle of a channel, the notifications the
//! channel emits while moving through it, and the `ChannelInfo` snapshot
//! returned by `Channel::info`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::endpoints::Endpoint;
use crate::error::ChannelError;

/// # Channel State
///
/// ```text
///   Initializing -> Up -> Ready -> DownReconnecting -> Up -> ...
///                                 \-> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ChannelState {
    /// Not started yet.
    #[default]
    Unknown,
    /// Opening the first connection.
    Initializing,
    /// A connection is open.
    Up,
    /// The connection is open and usable.
    Ready,
    /// The connection was lost or could not be opened; retrying.
    DownReconnecting,
    /// Terminal: closed explicitly or out of reconnect attempts.
    Closed,
}

impl ChannelState {
    /// Whether the channel has an open connection.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Up | Self::Ready)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Initializing => "Initializing",
            Self::Up => "Up",
            Self::Ready => "Ready",
            Self::DownReconnecting => "DownReconnecting",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Notifications delivered to the application, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A connection to `endpoint` is open.
    ChannelUp {
        /// Endpoint the channel connected to.
        endpoint: Endpoint,
    },
    /// The channel is ready for traffic.
    ChannelReady {
        /// Endpoint the channel is connected to.
        endpoint: Endpoint,
    },
    /// The connection is gone; the channel is retrying with `endpoint` next.
    ChannelDownReconnecting {
        /// The endpoint that will be tried next.
        endpoint: Endpoint,
        /// What went wrong, when known.
        error: Option<ChannelError>,
    },
    /// The channel is permanently down.
    ChannelDown {
        /// Why the channel gave up.
        error: ChannelError,
    },
    /// A managed fallback to the preferred endpoint has started.
    FallbackStarting {
        /// Endpoint currently serving the channel.
        from: Endpoint,
        /// Endpoint being switched to.
        to: Endpoint,
    },
    /// The managed fallback has ended. `endpoint` is where the channel is
    /// connected now, which is the old endpoint if the switch failed.
    FallbackComplete {
        /// Endpoint serving the channel after the fallback.
        endpoint: Endpoint,
    },
    /// A fallback check ran but the channel is already where it should be.
    FallbackNotPerformed {
        /// Endpoint the channel stays on.
        endpoint: Endpoint,
    },
    /// Something went wrong that the channel recovered from on its own.
    Warning {
        /// Human-readable description.
        text: String,
    },
    /// A buffer arrived on the live connection.
    Message {
        /// The raw bytes as read from the transport.
        payload: Bytes,
    },
}

impl ChannelEvent {
    /// Short name of the notification, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelUp { .. } => "ChannelUp",
            Self::ChannelReady { .. } => "ChannelReady",
            Self::ChannelDownReconnecting { .. } => "ChannelDownReconnecting",
            Self::ChannelDown { .. } => "ChannelDown",
            Self::FallbackStarting { .. } => "FallbackStarting",
            Self::FallbackComplete { .. } => "FallbackComplete",
            Self::FallbackNotPerformed { .. } => "FallbackNotPerformed",
            Self::Warning { .. } => "Warning",
            Self::Message { .. } => "Message",
        }
    }
}

/// Preferred host settings in effect, plus the time left to the next check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredHostInfo {
    /// Whether preferred host selection is on.
    pub enabled: bool,
    /// Index of the preferred endpoint.
    pub connection_list_index: i32,
    /// Detection interval in seconds.
    pub detection_interval: u64,
    /// Detection cron expression.
    pub detection_schedule: String,
    /// Time until the next automatic check; zero when none is pending.
    pub remaining_detection_time: Duration,
}

/// One configured endpoint and its reconnect counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    /// The endpoint.
    pub endpoint: Endpoint,
    /// Failed ordinary connects to this endpoint since it last came up.
    pub reconnect_attempts: u32,
}

/// The live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    /// Transport handle id.
    pub id: u64,
    /// Endpoint the transport was opened for.
    pub endpoint: Endpoint,
    /// Remote socket address.
    pub peer: Option<SocketAddr>,
}

/// # Channel Info
///
/// A snapshot of a channel, taken by the worker between events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// Live state.
    pub state: ChannelState,
    /// Endpoint the channel is on (or trying).
    pub current_endpoint: Endpoint,
    /// Its position in the list.
    pub current_index: usize,
    /// Preferred host policy in effect.
    pub preferred_host: PreferredHostInfo,
    /// Whether a managed fallback is in flight.
    pub fallback_in_progress: bool,
    /// Failed ordinary connects since the last success.
    pub reconnect_attempts: u32,
    /// Delay used for the latest retry.
    pub current_reconnect_delay: Duration,
    /// All endpoints with their counters.
    pub endpoints: Vec<EndpointStatus>,
    /// The live connection, if any.
    pub transport: Option<TransportInfo>,
}
