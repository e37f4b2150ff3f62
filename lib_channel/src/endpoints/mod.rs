//! # Endpoints Module
//!
//! Describes *where* a channel can connect. An `Endpoint` is one physical
//! address; an `EndpointList` is the ordered, non-empty set of candidates a
//! channel is configured with. The list is immutable for the lifetime of a
//! channel and cheap to clone, so the selector, the worker and the public
//! handle can all hold it.
//!
//! ## Contained Modules:
//! - **`selector`**: the endpoint-selection policies (`RoundRobin` and
//!   `PreferredHost`) that decide which entry of the list to try next.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Endpoint-selection policies.
pub mod selector;

pub use selector::{EndpointSelector, PreferredHost, RoundRobin};

/// # Endpoint
///
/// A single candidate server. When `session_management` is set the address is
/// not dialled directly: it is first resolved through the channel's
/// `ServiceDiscovery`, using `location` as a hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Host name or IP address.
    pub address: String,
    /// TCP port.
    pub port: u16,
    /// Resolve the real address through service discovery before connecting.
    #[serde(default)]
    pub session_management: bool,
    /// Optional geographic hint passed to service discovery (e.g. `"us-east-1"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Endpoint {
    /// Creates a directly-dialled endpoint.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            session_management: false,
            location: None,
        }
    }

    /// Marks the endpoint as resolved through service discovery.
    pub fn with_session_management(mut self, enabled: bool) -> Self {
        self.session_management = enabled;
        self
    }

    /// Sets the location hint used by service discovery.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// # Endpoint List
///
/// Ordered candidate endpoints. Insertion order is significant: it is the
/// round-robin order and the order in which `PreferredHost` visits alternates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList {
    endpoints: Arc<[Endpoint]>,
}

impl EndpointList {
    /// Builds a list, rejecting an empty one.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, ValidationError> {
        if endpoints.is_empty() {
            return Err(ValidationError::EmptyEndpointList);
        }
        Ok(Self {
            endpoints: endpoints.into(),
        })
    }

    /// Number of endpoints (always at least one).
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always `false`; kept for API symmetry with slices.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns the endpoint at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    /// Iterates over the endpoints in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Checks a signed preferred index against the list bounds.
    pub fn check_index(&self, index: i32) -> Result<usize, ValidationError> {
        if index < 0 {
            return Err(ValidationError::NegativePreferredIndex(index));
        }
        let position = index as usize;
        if position >= self.len() {
            return Err(ValidationError::PreferredIndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(position)
    }
}

impl Index<usize> for EndpointList {
    type Output = Endpoint;

    fn index(&self, index: usize) -> &Self::Output {
        &self.endpoints[index]
    }
}
