//! # Channel Handle
//!
//! `ChannelBuilder` validates a `ChannelConfig`, spawns the channel worker
//! and returns a cloneable `Channel` handle plus the receiver on which the
//! worker delivers `ChannelEvent`s.
//!
//! Handle methods either read the live half of the `FallbackContext`
//! directly (`state`, `submit`, user context) or post a command to the
//! worker and wait for its reply (`fallback_to_preferred_host`, `info`,
//! `close`). `apply_policy` validates synchronously and only posts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::core::config::ChannelConfig;
use crate::core::state::{ChannelEvent, ChannelInfo, ChannelState};
use crate::core::worker::{ChannelWorker, Command, PolicyUpdate, WorkerSetup};
use crate::endpoints::{EndpointList, EndpointSelector};
use crate::error::{ChannelError, Result, ValidationError};
use crate::fallback::context::{FallbackContext, UserContext};
use crate::fallback::policy::FallbackPolicy;
use crate::fallback::trigger::FallbackTrigger;
use crate::transport::{Connector, ServiceDiscovery, TcpConnector};

/// The notification stream of a channel.
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// # Channel Builder
///
/// ```no_run
/// # async fn demo() -> lib_channel::error::Result<()> {
/// use lib_channel::{ChannelBuilder, ChannelConfig, Endpoint, FallbackPolicy};
///
/// let config = ChannelConfig::new(
///     "prices",
///     vec![Endpoint::new("rt1.example", 14002), Endpoint::new("rt2.example", 14002)],
/// )
/// .with_preferred_host(FallbackPolicy {
///     enabled: true,
///     connection_list_index: 0,
///     detection_interval: 300,
///     ..FallbackPolicy::default()
/// });
///
/// let (channel, mut events) = ChannelBuilder::new(config).start()?;
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// channel.close().await
/// # }
/// ```
pub struct ChannelBuilder {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    user_context: Option<UserContext>,
}

impl ChannelBuilder {
    /// Starts from `config` with the TCP connector and no service discovery.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            connector: Arc::new(TcpConnector),
            discovery: None,
            user_context: None,
        }
    }

    /// Replaces the connector used to open transports.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Sets the service discovery used for session-managed endpoints.
    pub fn discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Attaches application data to the channel.
    pub fn user_context(mut self, user_context: UserContext) -> Self {
        self.user_context = Some(user_context);
        self
    }

    /// Validates the configuration and starts the channel. Must be called
    /// from within a tokio runtime.
    pub fn start(self) -> Result<(Channel, ChannelEvents)> {
        let endpoints = self.config.validate()?;
        if self.discovery.is_none() {
            if let Some(endpoint) = endpoints.iter().find(|e| e.session_management) {
                return Err(ValidationError::MissingServiceDiscovery(endpoint.to_string()).into());
            }
        }
        let selector = EndpointSelector::from_policy(endpoints.clone(), &self.config.preferred_host)?;
        let trigger = FallbackTrigger::from_policy(&self.config.preferred_host)?;

        let context = Arc::new(FallbackContext::new(self.user_context));
        context.set_state(ChannelState::Initializing);
        let closed = Arc::new(AtomicBool::new(false));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let name: Arc<str> = Arc::from(self.config.name.as_str());

        info!(channel = %name, endpoints = endpoints.len(), "Starting channel");
        let worker = ChannelWorker::new(WorkerSetup {
            config: self.config,
            selector,
            trigger,
            connector: self.connector,
            discovery: self.discovery,
            context: Arc::clone(&context),
            closed: Arc::clone(&closed),
            commands: commands_rx,
            events: events_tx,
        });
        tokio::spawn(worker.run());

        let channel = Channel {
            name,
            endpoints,
            commands: commands_tx,
            context,
            closed,
        };
        Ok((channel, events_rx))
    }
}

/// # Channel
///
/// A handle to a running channel. Clones share the same channel; the
/// channel shuts down when `close` is called or the last handle is dropped.
#[derive(Clone)]
pub struct Channel {
    name: Arc<str>,
    endpoints: EndpointList,
    commands: mpsc::UnboundedSender<Command>,
    context: Arc<FallbackContext>,
    closed: Arc<AtomicBool>,
}

impl Channel {
    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured endpoints.
    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    /// The state the application sees. A running fallback does not show here.
    pub fn state(&self) -> ChannelState {
        self.context.live_state()
    }

    /// Queues `payload` on the live connection.
    pub fn submit(&self, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        if !self.context.live_state().is_connected() {
            return Err(ChannelError::NotConnected);
        }
        match self.context.live_transport() {
            Some(transport) => transport.send(payload),
            None => Err(ChannelError::NotConnected),
        }
    }

    /// Asks the channel to switch back to its preferred endpoint now.
    ///
    /// Returns once the request has been accepted; the outcome arrives as
    /// `FallbackStarting` / `FallbackComplete`, or `FallbackNotPerformed`
    /// when the channel is already on the preferred endpoint.
    ///
    /// # Errors
    /// `InvalidUsage` when preferred host is disabled, `NotConnected` while
    /// the channel is down, `Shutdown` after close.
    pub async fn fallback_to_preferred_host(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Fallback { reply })?;
        response.await.map_err(|_| ChannelError::Shutdown)?
    }

    /// Replaces the preferred host policy.
    ///
    /// The policy is validated here and rejected without any effect when it
    /// is invalid. A valid policy is handed to the channel, which applies it
    /// right away, or after the running fallback when one is in flight.
    pub fn apply_policy(&self, policy: FallbackPolicy) -> Result<()> {
        self.ensure_open()?;
        policy.validate(&self.endpoints)?;
        let selector = EndpointSelector::from_policy(self.endpoints.clone(), &policy)?;
        let trigger = FallbackTrigger::from_policy(&policy)?;
        self.post(Command::ApplyPolicy(PolicyUpdate {
            policy,
            selector,
            trigger,
        }))
    }

    /// A snapshot of the channel.
    pub async fn info(&self) -> Result<ChannelInfo> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Info { reply })?;
        response.await.map_err(|_| ChannelError::Shutdown)
    }

    /// Closes the channel, aborting any fallback. A second close fails with
    /// `Shutdown`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::Shutdown);
        }
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = response.await;
        }
        Ok(())
    }

    /// Application data attached to the channel.
    pub fn user_context(&self) -> Option<UserContext> {
        self.context.live_user_context()
    }

    /// Replaces the application data attached to the channel.
    pub fn set_user_context(&self, user_context: Option<UserContext>) {
        self.context.replace_user_context(user_context);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Shutdown);
        }
        Ok(())
    }

    fn post(&self, command: Command) -> Result<()> {
        self.ensure_open()?;
        self.commands
            .send(command)
            .map_err(|_| ChannelError::Shutdown)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
