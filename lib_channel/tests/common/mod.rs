//! In-memory network used by the integration tests.
//!
//! Each endpoint is identified by its port. A port can be reachable or not,
//! and connects to it can be held until the test releases them.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lib_channel::error::{ChannelError, Result};
use lib_channel::{
    ChannelBuilder, ChannelConfig, ChannelEvent, ChannelEvents, Connector, Endpoint,
    ServiceDiscovery, Transport,
};

pub const PRIMARY: u16 = 14001;
pub const SECONDARY: u16 = 14002;
pub const TERTIARY: u16 = 14003;

pub fn endpoint(port: u16) -> Endpoint {
    Endpoint::new("127.0.0.1", port)
}

pub fn endpoints(ports: &[u16]) -> Vec<Endpoint> {
    ports.iter().copied().map(endpoint).collect()
}

#[derive(Default)]
struct NetworkState {
    reachable: HashSet<u16>,
    gates: HashMap<u16, Arc<Notify>>,
    connects: Vec<u16>,
    connect_times: Vec<Instant>,
    transports: Vec<Arc<MockTransport>>,
}

/// Shared fake network. Clones see the same state.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    pub fn new(reachable: &[u16]) -> Self {
        let network = Self::default();
        for port in reachable {
            network.set_reachable(*port, true);
        }
        network
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().expect("network lock poisoned")
    }

    pub fn set_reachable(&self, port: u16, reachable: bool) {
        let mut state = self.lock();
        if reachable {
            state.reachable.insert(port);
        } else {
            state.reachable.remove(&port);
        }
    }

    /// Makes connects to `port` wait until `release` is called.
    pub fn hold(&self, port: u16) {
        self.lock().gates.insert(port, Arc::new(Notify::new()));
    }

    /// Lets every held connect to `port` proceed.
    pub fn release(&self, port: u16) {
        if let Some(gate) = self.lock().gates.remove(&port) {
            gate.notify_waiters();
        }
    }

    /// Ports of all connect attempts so far, in order.
    pub fn connects(&self) -> Vec<u16> {
        self.lock().connects.clone()
    }

    /// Clock readings taken as each connect attempt started.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.lock().connect_times.clone()
    }

    /// Transports opened to `port`, oldest first.
    pub fn transports(&self, port: u16) -> Vec<Arc<MockTransport>> {
        self.lock()
            .transports
            .iter()
            .filter(|t| t.port == port)
            .cloned()
            .collect()
    }

    /// The most recent transport opened to `port`.
    pub fn last_transport(&self, port: u16) -> Arc<MockTransport> {
        self.transports(port)
            .pop()
            .unwrap_or_else(|| panic!("no transport was opened to port {port}"))
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            network: self.clone(),
        })
    }
}

struct MockConnector {
    network: MockNetwork,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        let gate = {
            let mut state = self.network.lock();
            state.connects.push(endpoint.port);
            state.connect_times.push(Instant::now());
            state.gates.get(&endpoint.port).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.network.lock();
        if !state.reachable.contains(&endpoint.port) {
            return Err(ChannelError::Transport {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let transport = Arc::new(MockTransport::new(endpoint.port));
        state.transports.push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// A connected in-memory transport.
pub struct MockTransport {
    pub port: u16,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    sent: Mutex<Vec<Bytes>>,
    closed: CancellationToken,
}

impl MockTransport {
    fn new(port: u16) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            port,
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        }
    }

    /// Delivers `payload` as if the server had sent it.
    pub fn push(&self, payload: &'static [u8]) {
        let _ = self.inbound_tx.send(Bytes::from_static(payload));
    }

    /// Simulates the server dropping the connection.
    pub fn drop_connection(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], self.port)))
    }

    fn send(&self, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::NotConnected);
        }
        self.sent.lock().expect("sent lock poisoned").push(payload);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            payload = inbound.recv() => Ok(payload),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Resolves every session-managed endpoint to a fixed port.
pub struct FixedDiscovery {
    pub port: u16,
}

#[async_trait]
impl ServiceDiscovery for FixedDiscovery {
    async fn discover(&self, endpoint: &Endpoint) -> Result<Endpoint> {
        Ok(Endpoint::new(endpoint.address.clone(), self.port))
    }
}

/// Starts a channel over `network`.
pub fn start(network: &MockNetwork, config: ChannelConfig) -> (lib_channel::Channel, ChannelEvents) {
    ChannelBuilder::new(config)
        .connector(network.connector())
        .start()
        .expect("channel should start")
}

/// Fast reconnects so tests do not wait on real backoff.
pub fn config(ports: &[u16]) -> ChannelConfig {
    ChannelConfig::new("test", endpoints(ports))
        .with_reconnect_delays(Duration::from_millis(10), Duration::from_millis(80))
}

/// Waits for the next notification, skipping inbound messages.
pub async fn next_event(events: &mut ChannelEvents) -> ChannelEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(600), events.recv())
            .await
            .expect("timed out waiting for a channel event")
            .expect("event stream closed");
        if !matches!(event, ChannelEvent::Message { .. }) {
            return event;
        }
    }
}

/// Collects notifications until one matches `stop`, returning all of them.
pub async fn events_until(
    events: &mut ChannelEvents,
    stop: impl Fn(&ChannelEvent) -> bool,
) -> Vec<ChannelEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Waits until the channel reports `ChannelReady`.
pub async fn until_ready(events: &mut ChannelEvents) -> Vec<ChannelEvent> {
    events_until(events, |e| matches!(e, ChannelEvent::ChannelReady { .. })).await
}
