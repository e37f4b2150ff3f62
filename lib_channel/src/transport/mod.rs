//! # Transport Module
//!
//! The seams between the channel state machine and the network. The channel
//! never opens sockets itself; it asks a `Connector` for a `Transport` and,
//! for session-managed endpoints, asks a `ServiceDiscovery` where to connect
//! first. Tests plug in in-memory implementations through the same traits.
//!
//! ## Contained Modules:
//! - **`tcp`**: the default tokio TCP connector.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::endpoints::Endpoint;
use crate::error::Result;

/// Plain TCP transport.
pub mod tcp;

pub use tcp::{TcpConnector, TcpTransport};

/// An open, bidirectional connection to one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Queues `payload` for sending. Never waits on I/O.
    fn send(&self, payload: Bytes) -> Result<()>;

    /// Waits for the next inbound buffer. `Ok(None)` means the peer closed
    /// the connection in an orderly way.
    async fn recv(&self) -> Result<Option<Bytes>>;

    /// Closes the connection. Pending and later `recv` calls return.
    fn close(&self);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>>;
}

/// Resolves session-managed endpoints to the address to dial.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Returns the endpoint that should actually be connected to.
    async fn discover(&self, endpoint: &Endpoint) -> Result<Endpoint>;
}

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// # Transport Handle
///
/// A transport as the channel tracks it: the connection itself plus which
/// endpoint it belongs to. Every handle gets a process-unique id, which is
/// how the channel tells the live connection from a shadow one.
#[derive(Clone)]
pub struct TransportHandle {
    id: u64,
    endpoint_index: usize,
    endpoint: Endpoint,
    inner: Arc<dyn Transport>,
}

impl TransportHandle {
    /// Wraps a freshly opened transport.
    pub fn new(endpoint_index: usize, endpoint: Endpoint, inner: Arc<dyn Transport>) -> Self {
        Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            endpoint_index,
            endpoint,
            inner,
        }
    }

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Position of the endpoint in the channel's list.
    pub fn endpoint_index(&self) -> usize {
        self.endpoint_index
    }

    /// The configured endpoint this transport was opened for.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    /// See [`Transport::send`].
    pub fn send(&self, payload: Bytes) -> Result<()> {
        self.inner.send(payload)
    }

    /// See [`Transport::recv`].
    pub async fn recv(&self) -> Result<Option<Bytes>> {
        self.inner.recv().await
    }

    /// See [`Transport::close`].
    pub fn close(&self) {
        self.inner.close()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("endpoint_index", &self.endpoint_index)
            .field("endpoint", &self.endpoint.to_string())
            .finish()
    }
}
