//! # lib_channel
//!
//! Connection lifecycle management for redundant market-data endpoints.
//!
//! A channel keeps one logical connection to a list of equivalent servers.
//! It reconnects with exponential backoff when the connection drops and,
//! with preferred host enabled, moves back to the preferred server on a
//! timer, on a cron schedule or on request, without the application ever
//! seeing the channel go down.
//!
//! ## Modules:
//! - **`endpoints`**: endpoint list and selection policies.
//! - **`fallback`**: preferred host policy, detection trigger and the
//!   shadowed state used during a switchover.
//! - **`core`**: the channel state machine, its builder and handle.
//! - **`transport`**: connector, transport and service discovery traits,
//!   with a TCP implementation.
//! - **`configs`** (feature `configs`): layered JSON configuration.
//! - **`loggers`** (feature `loggers`): `tracing` subscriber setup.

pub mod core;
pub mod endpoints;
pub mod error;
pub mod fallback;
pub mod transport;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the everyday API
pub use crate::core::{
    Channel, ChannelBuilder, ChannelConfig, ChannelEvent, ChannelEvents, ChannelInfo, ChannelState,
};
pub use endpoints::{Endpoint, EndpointList, EndpointSelector};
pub use error::{ChannelError, ValidationError};
pub use fallback::{FallbackPolicy, UserContext};
pub use transport::{Connector, ServiceDiscovery, Transport};
