//! # Channel Worker
//!
//! The single owner of a channel's mutable state. One task per channel runs
//! `ChannelWorker::run`, a `tokio::select!` loop over:
//!
//! - commands from `Channel` handles (fallback requests, policy updates,
//!   info snapshots, close),
//! - events posted by the I/O tasks it spawns (connect results, inbound
//!   buffers, lost connections),
//! - the detection timer (interval deadline or cron ticks),
//! - the reconnect backoff deadline.
//!
//! Only the `FallbackContext` is shared with the outside; the selector, the
//! trigger, the reconnect timing and the queued policy live here and are
//! never touched from another task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::config::ChannelConfig;
use crate::core::reconnect::{ReconnectDecision, ReconnectScheduler};
use crate::core::state::{
    ChannelEvent, ChannelInfo, ChannelState, EndpointStatus, PreferredHostInfo, TransportInfo,
};
use crate::endpoints::{Endpoint, EndpointSelector};
use crate::error::{ChannelError, Result};
use crate::fallback::context::FallbackContext;
use crate::fallback::policy::FallbackPolicy;
use crate::fallback::trigger::{DetectionTick, FallbackTrigger};
use crate::transport::{Connector, ServiceDiscovery, Transport, TransportHandle};

/// Requests from `Channel` handles.
pub(crate) enum Command {
    Fallback {
        reply: oneshot::Sender<Result<()>>,
    },
    ApplyPolicy(PolicyUpdate),
    Info {
        reply: oneshot::Sender<ChannelInfo>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// A validated policy together with the selector and trigger built from it.
pub(crate) struct PolicyUpdate {
    pub(crate) policy: FallbackPolicy,
    pub(crate) selector: EndpointSelector,
    pub(crate) trigger: FallbackTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectPurpose {
    Recover,
    Fallback,
}

#[derive(Debug, Clone, Copy)]
struct PendingConnect {
    attempt: u64,
    purpose: ConnectPurpose,
    endpoint_index: usize,
}

enum WorkerEvent {
    Connected {
        attempt: u64,
        outcome: Result<TransportHandle>,
    },
    Received {
        transport_id: u64,
        payload: Bytes,
    },
    Lost {
        transport_id: u64,
        error: Option<ChannelError>,
    },
}

/// Everything the worker needs at start-up.
pub(crate) struct WorkerSetup {
    pub(crate) config: ChannelConfig,
    pub(crate) selector: EndpointSelector,
    pub(crate) trigger: FallbackTrigger,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) discovery: Option<Arc<dyn ServiceDiscovery>>,
    pub(crate) context: Arc<FallbackContext>,
    pub(crate) closed: Arc<AtomicBool>,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) events: mpsc::UnboundedSender<ChannelEvent>,
}

pub(crate) struct ChannelWorker {
    name: String,
    init_timeout: Duration,
    connector: Arc<dyn Connector>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    context: Arc<FallbackContext>,
    closed: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ticks_tx: mpsc::UnboundedSender<DetectionTick>,
    ticks_rx: mpsc::UnboundedReceiver<DetectionTick>,
    policy: FallbackPolicy,
    selector: EndpointSelector,
    trigger: FallbackTrigger,
    pending_policy: Option<PolicyUpdate>,
    reconnect: ReconnectScheduler,
    endpoint_attempts: Vec<u32>,
    connecting: Option<PendingConnect>,
    attempt_seq: u64,
    retry_at: Option<Instant>,
    stopped: bool,
}

impl ChannelWorker {
    pub(crate) fn new(setup: WorkerSetup) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let config = setup.config;
        let endpoint_count = setup.selector.endpoints().len();

        Self {
            name: config.name.clone(),
            init_timeout: config.init_timeout(),
            connector: setup.connector,
            discovery: setup.discovery,
            context: setup.context,
            closed: setup.closed,
            commands: setup.commands,
            events: setup.events,
            worker_tx,
            worker_rx,
            ticks_tx,
            ticks_rx,
            policy: config.preferred_host.clone(),
            selector: setup.selector,
            trigger: setup.trigger,
            pending_policy: None,
            reconnect: ReconnectScheduler::new(
                config.reconnect_min_delay(),
                config.reconnect_max_delay(),
                config.reconnect_attempt_limit,
            ),
            endpoint_attempts: vec![0; endpoint_count],
            connecting: None,
            attempt_seq: 0,
            retry_at: None,
            stopped: false,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(channel = %self.name, "Channel worker started");
        self.start_connect(ConnectPurpose::Recover);

        while !self.stopped {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone.
                    None => self.terminate(None).await,
                },
                Some(event) = self.worker_rx.recv() => self.handle_worker_event(event).await,
                Some(tick) = self.ticks_rx.recv() => self.on_tick(tick).await,
                _ = sleep_until_opt(self.trigger.interval_deadline()) => {
                    self.trigger.rearm_interval();
                    self.detect().await;
                }
                _ = sleep_until_opt(self.retry_at) => {
                    self.retry_at = None;
                    self.start_connect(ConnectPurpose::Recover);
                }
            }
        }

        // Connects that finish from here on see a closed queue and close
        // their own transport; the ones already queued are closed here.
        self.worker_rx.close();
        while let Ok(event) = self.worker_rx.try_recv() {
            if let WorkerEvent::Connected {
                outcome: Ok(orphan),
                ..
            } = event
            {
                orphan.close();
            }
        }
        info!(channel = %self.name, "Channel worker stopped");
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Fallback { reply } => {
                let result = self.manual_fallback();
                let _ = reply.send(result);
            }
            Command::ApplyPolicy(update) => {
                if self.fallback_in_flight() {
                    if self.pending_policy.replace(update).is_some() {
                        debug!(channel = %self.name, "Queued policy update superseded");
                    }
                    info!(channel = %self.name, "Policy update deferred until the running fallback completes");
                } else {
                    self.install_policy(update).await;
                }
            }
            Command::Info { reply } => {
                let info = self.info().await;
                let _ = reply.send(info);
            }
            Command::Close { reply } => {
                self.terminate(None).await;
                let _ = reply.send(());
            }
        }
    }

    fn manual_fallback(&mut self) -> Result<()> {
        if !self.policy.enabled {
            return Err(ChannelError::InvalidUsage(
                "preferred host fallback is disabled for this channel".to_string(),
            ));
        }
        if self.fallback_in_flight() {
            return Ok(());
        }
        if !self.context.live_state().is_connected() || self.connecting.is_some() {
            return Err(ChannelError::NotConnected);
        }
        if !self.selector.should_switch_prematurely() {
            self.emit(ChannelEvent::FallbackNotPerformed {
                endpoint: self.selector.current().clone(),
            });
            return Ok(());
        }
        self.begin_fallback();
        Ok(())
    }

    async fn install_policy(&mut self, update: PolicyUpdate) {
        let PolicyUpdate {
            policy,
            mut selector,
            trigger,
        } = update;

        selector.resume_at(self.selector.current_index());
        self.trigger.shutdown().await;
        self.selector = selector;
        self.trigger = trigger;
        self.policy = policy;
        info!(
            channel = %self.name,
            enabled = self.policy.enabled,
            preferred = self.policy.connection_list_index,
            "Preferred host policy applied"
        );

        if self.context.live_state().is_connected() {
            self.arm_trigger().await;
        }
    }

    async fn apply_pending_policy(&mut self) -> bool {
        match self.pending_policy.take() {
            Some(update) => {
                self.install_policy(update).await;
                true
            }
            None => false,
        }
    }

    async fn info(&self) -> ChannelInfo {
        let transport = self.context.live_transport().map(|t| TransportInfo {
            id: t.id(),
            endpoint: t.endpoint().clone(),
            peer: self.context.live_socket(),
        });
        let endpoints = self
            .selector
            .endpoints()
            .iter()
            .zip(&self.endpoint_attempts)
            .map(|(endpoint, attempts)| EndpointStatus {
                endpoint: endpoint.clone(),
                reconnect_attempts: *attempts,
            })
            .collect();

        ChannelInfo {
            name: self.name.clone(),
            state: self.context.live_state(),
            current_endpoint: self.selector.current().clone(),
            current_index: self.selector.current_index(),
            preferred_host: PreferredHostInfo {
                enabled: self.policy.enabled,
                connection_list_index: self.policy.connection_list_index,
                detection_interval: self.policy.detection_interval,
                detection_schedule: self.policy.detection_schedule.clone(),
                remaining_detection_time: self.trigger.remaining().await,
            },
            fallback_in_progress: self.fallback_in_flight(),
            reconnect_attempts: self.reconnect.attempts(),
            current_reconnect_delay: self.reconnect.current_delay(),
            endpoints,
            transport,
        }
    }

    // ---------------------------------------------------------------------
    // Connecting
    // ---------------------------------------------------------------------

    fn start_connect(&mut self, purpose: ConnectPurpose) {
        let endpoint_index = match purpose {
            ConnectPurpose::Recover => self.selector.current_index(),
            ConnectPurpose::Fallback => self.selector.next_index(),
        };
        let endpoint = self.selector.endpoints()[endpoint_index].clone();
        self.attempt_seq += 1;
        let attempt = self.attempt_seq;
        self.connecting = Some(PendingConnect {
            attempt,
            purpose,
            endpoint_index,
        });
        debug!(channel = %self.name, endpoint = %endpoint, attempt, ?purpose, "Connecting");

        let connector = Arc::clone(&self.connector);
        let discovery = self.discovery.clone();
        let init_timeout = self.init_timeout;
        let tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(
                init_timeout,
                open_transport(connector, discovery, &endpoint),
            )
            .await
            {
                Ok(Ok(inner)) => Ok(TransportHandle::new(endpoint_index, endpoint, inner)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ChannelError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout_ms: init_timeout.as_millis() as u64,
                }),
            };
            if let Err(unsent) = tx.send(WorkerEvent::Connected { attempt, outcome }) {
                // The worker is gone; nobody will adopt this transport.
                if let WorkerEvent::Connected {
                    outcome: Ok(orphan),
                    ..
                } = unsent.0
                {
                    orphan.close();
                }
            }
        });
    }

    async fn on_connected(&mut self, attempt: u64, outcome: Result<TransportHandle>) {
        let pending = match self.connecting {
            Some(pending) if pending.attempt == attempt => pending,
            _ => {
                if let Ok(stale) = outcome {
                    debug!(channel = %self.name, attempt, "Closing transport from an abandoned attempt");
                    stale.close();
                }
                return;
            }
        };
        self.connecting = None;

        match (pending.purpose, outcome) {
            (ConnectPurpose::Recover, Ok(transport)) => self.channel_up(transport).await,
            (ConnectPurpose::Recover, Err(e)) => self.connect_failed(pending.endpoint_index, e).await,
            (ConnectPurpose::Fallback, Ok(transport)) => self.fallback_connected(transport).await,
            (ConnectPurpose::Fallback, Err(e)) => self.fallback_failed(e).await,
        }
    }

    async fn channel_up(&mut self, transport: TransportHandle) {
        let index = transport.endpoint_index();
        let endpoint = transport.endpoint().clone();
        self.watch(&transport);

        if let Some(previous) = self.context.set_transport(Some(transport)) {
            previous.close();
        }
        self.selector.resume_at(index);
        self.context.set_state(ChannelState::Up);
        if self.context.is_first_time_connect() {
            self.context.mark_connected();
            info!(channel = %self.name, endpoint = %endpoint, "Channel up");
        } else {
            info!(
                channel = %self.name,
                endpoint = %endpoint,
                failed_attempts = self.reconnect.attempts(),
                "Channel recovered"
            );
        }
        self.reconnect.reset();
        self.endpoint_attempts[index] = 0;
        self.emit(ChannelEvent::ChannelUp {
            endpoint: endpoint.clone(),
        });

        self.context.set_state(ChannelState::Ready);
        self.emit(ChannelEvent::ChannelReady { endpoint });
        self.arm_trigger().await;
    }

    async fn connect_failed(&mut self, endpoint_index: usize, error: ChannelError) {
        self.endpoint_attempts[endpoint_index] += 1;
        match self.reconnect.record_failure() {
            ReconnectDecision::Exhausted => {
                let limit = self.reconnect.attempt_limit();
                error!(channel = %self.name, limit, "Reconnect attempt limit reached: {}", error);
                self.terminate(Some(ChannelError::AttemptLimitExhausted { limit }))
                    .await;
            }
            ReconnectDecision::Retry(delay) => {
                let next = self.selector.switch_to_next().clone();
                warn!(
                    channel = %self.name,
                    attempt = self.reconnect.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    next = %next,
                    "Connect failed: {}",
                    error
                );
                if self.context.live_state() != ChannelState::DownReconnecting {
                    self.context.set_state(ChannelState::DownReconnecting);
                    self.emit(ChannelEvent::ChannelDownReconnecting {
                        endpoint: next,
                        error: Some(error),
                    });
                }
                self.retry_at = Some(Instant::now() + delay);
            }
        }
    }

    async fn connection_lost(&mut self, error: Option<ChannelError>) {
        self.trigger.disarm().await;
        if let Some(lost) = self.context.set_transport(None) {
            lost.close();
        }
        let next = self.selector.switch_to_next().clone();
        match &error {
            Some(e) => warn!(channel = %self.name, next = %next, "Connection lost: {}", e),
            None => warn!(channel = %self.name, next = %next, "Connection closed by peer"),
        }
        self.context.set_state(ChannelState::DownReconnecting);
        self.emit(ChannelEvent::ChannelDownReconnecting {
            endpoint: next,
            error,
        });
        self.start_connect(ConnectPurpose::Recover);
    }

    // ---------------------------------------------------------------------
    // Managed fallback
    // ---------------------------------------------------------------------

    fn fallback_in_flight(&self) -> bool {
        self.context.is_switching()
            || matches!(self.connecting, Some(p) if p.purpose == ConnectPurpose::Fallback)
    }

    async fn detect(&mut self) {
        if !self.context.live_state().is_connected()
            || self.fallback_in_flight()
            || self.connecting.is_some()
        {
            return;
        }
        if self.selector.should_switch_prematurely() {
            self.begin_fallback();
        } else {
            debug!(channel = %self.name, "Detection: already on the preferred endpoint");
            self.emit(ChannelEvent::FallbackNotPerformed {
                endpoint: self.selector.current().clone(),
            });
        }
    }

    async fn on_tick(&mut self, tick: DetectionTick) {
        if self.trigger.accepts(&tick) {
            self.detect().await;
        } else {
            debug!(channel = %self.name, "Ignoring detection tick from a replaced job");
        }
    }

    fn begin_fallback(&mut self) {
        if !self.context.begin_fallback() {
            return;
        }
        let from = self.selector.current().clone();
        let to = self.selector.next().clone();
        info!(channel = %self.name, from = %from, to = %to, "Fallback to preferred host starting");
        self.emit(ChannelEvent::FallbackStarting { from, to });

        // Lands on the shadow copy; observers keep seeing the live state.
        self.context.set_state(ChannelState::Initializing);
        self.start_connect(ConnectPurpose::Fallback);
    }

    async fn fallback_connected(&mut self, transport: TransportHandle) {
        let index = transport.endpoint_index();
        let endpoint = transport.endpoint().clone();
        self.watch(&transport);

        self.context.set_transport(Some(transport.clone()));
        self.context.set_state(ChannelState::Up);
        if !self.context.reconnection_complete() {
            transport.close();
            return;
        }

        if self.selector.next_index() == index {
            self.selector.switch_to_next();
        } else {
            self.selector.resume_at(index);
        }
        self.context.set_state(ChannelState::Ready);
        if let Some(old) = self.context.switchover_complete() {
            old.close();
        }
        self.reconnect.reset();
        self.endpoint_attempts[index] = 0;

        info!(channel = %self.name, endpoint = %endpoint, "Fallback to preferred host complete");
        self.emit(ChannelEvent::FallbackComplete { endpoint });

        if !self.apply_pending_policy().await {
            self.arm_trigger().await;
        }
    }

    async fn fallback_failed(&mut self, error: ChannelError) {
        if matches!(self.connecting, Some(p) if p.purpose == ConnectPurpose::Fallback) {
            self.connecting = None;
        }
        if let Some(shadow) = self.context.rollback() {
            shadow.close();
        }

        let endpoint = self.selector.current().clone();
        warn!(channel = %self.name, endpoint = %endpoint, "Fallback abandoned: {}", error);
        self.emit(ChannelEvent::Warning {
            text: format!("Fallback to preferred host abandoned: {}", error),
        });
        self.emit(ChannelEvent::FallbackComplete { endpoint });
        self.apply_pending_policy().await;
    }

    // ---------------------------------------------------------------------
    // Transport events
    // ---------------------------------------------------------------------

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Connected { attempt, outcome } => self.on_connected(attempt, outcome).await,
            WorkerEvent::Received {
                transport_id,
                payload,
            } => {
                let live = self.context.live_transport().map(|t| t.id());
                if live == Some(transport_id) {
                    self.emit(ChannelEvent::Message { payload });
                }
            }
            WorkerEvent::Lost {
                transport_id,
                error,
            } => self.on_lost(transport_id, error).await,
        }
    }

    async fn on_lost(&mut self, transport_id: u64, error: Option<ChannelError>) {
        let live = self.context.live_transport().map(|t| t.id());
        if live == Some(transport_id) {
            if self.fallback_in_flight() {
                self.fallback_failed(ChannelError::Transport {
                    endpoint: self.selector.current().to_string(),
                    reason: "live connection lost during fallback".to_string(),
                })
                .await;
            }
            self.connection_lost(error).await;
            return;
        }

        let shadow = self.context.transport().map(|t| t.id());
        if self.context.is_shadowing() && shadow == Some(transport_id) {
            let error = error.unwrap_or_else(|| ChannelError::Transport {
                endpoint: self.selector.next().to_string(),
                reason: "connection closed during fallback".to_string(),
            });
            self.fallback_failed(error).await;
        }
    }

    fn watch(&self, transport: &TransportHandle) {
        let transport = transport.clone();
        let tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let transport_id = transport.id();
            let error = loop {
                match transport.recv().await {
                    Ok(Some(payload)) => {
                        let event = WorkerEvent::Received {
                            transport_id,
                            payload,
                        };
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break None,
                    Err(e) => break Some(e),
                }
            };
            let _ = tx.send(WorkerEvent::Lost {
                transport_id,
                error,
            });
        });
    }

    // ---------------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------------

    async fn arm_trigger(&mut self) {
        if let Err(e) = self.trigger.arm(&self.ticks_tx).await {
            warn!(channel = %self.name, "Could not arm fallback detection: {}", e);
            self.emit(ChannelEvent::Warning {
                text: format!("Fallback detection unavailable: {}", e),
            });
        }
    }

    /// Closes everything and stops the loop. Aborts a running fallback.
    async fn terminate(&mut self, error: Option<ChannelError>) {
        self.closed.store(true, Ordering::Release);
        if let Some(shadow) = self.context.rollback() {
            shadow.close();
        }
        self.connecting = None;
        self.retry_at = None;
        self.pending_policy = None;
        self.trigger.shutdown().await;
        if let Some(live) = self.context.set_transport(None) {
            live.close();
        }
        self.context.set_state(ChannelState::Closed);
        if let Some(error) = error {
            self.emit(ChannelEvent::ChannelDown { error });
        }
        info!(channel = %self.name, "Channel closed");
        self.stopped = true;
    }

    fn emit(&self, event: ChannelEvent) {
        debug!(channel = %self.name, event = event.kind(), "Notify");
        // The application may have dropped its receiver; the channel keeps running.
        let _ = self.events.send(event);
    }
}

async fn open_transport(
    connector: Arc<dyn Connector>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    endpoint: &Endpoint,
) -> Result<Arc<dyn Transport>> {
    if !endpoint.session_management {
        return connector.connect(endpoint).await;
    }

    let discovery = discovery.ok_or_else(|| ChannelError::Discovery {
        endpoint: endpoint.to_string(),
        reason: "no service discovery configured".to_string(),
    })?;
    let resolved = discovery.discover(endpoint).await.map_err(|e| match e {
        ChannelError::Discovery { .. } => e,
        other => ChannelError::Discovery {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    })?;
    debug!(endpoint = %endpoint, resolved = %resolved, "Service discovery resolved endpoint");
    connector.connect(&resolved).await
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
