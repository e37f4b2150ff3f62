//! # Fallback Context
//!
//! While a fallback is in flight a channel has two connections: the *live*
//! one that keeps serving the application, and the *shadow* one being opened
//! to the preferred endpoint. All lifecycle writes made during that window
//! must land on the shadow copy, and every observer read must keep seeing the
//! live copy until the switchover commits.
//!
//! `FallbackContext` keeps both copies behind one lock and routes every
//! write through a single selection point (`active`), so no caller has to
//! know whether a fallback is running.
//!
//! The fallback itself moves through three phases:
//!
//! ```text
//!   Idle --begin_fallback--> Switching --reconnection_complete--> Reconnected
//!    ^                          |                                     |
//!    +---------rollback---------+                                     |
//!    +------------------------switchover_complete---------------------+
//! ```

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::state::ChannelState;
use crate::transport::TransportHandle;

/// Opaque per-channel application data. It is carried across switchovers and
/// never inspected by the channel.
pub type UserContext = Arc<dyn Any + Send + Sync>;

/// The per-connection properties of a channel.
#[derive(Clone, Default)]
pub struct ChannelProps {
    /// Lifecycle state.
    pub state: ChannelState,
    /// The connection the properties belong to.
    pub transport: Option<TransportHandle>,
    /// Remote address of that connection.
    pub socket: Option<SocketAddr>,
    /// Application data attached to the channel.
    pub user_context: Option<UserContext>,
}

impl fmt::Debug for ChannelProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelProps")
            .field("state", &self.state)
            .field("transport", &self.transport)
            .field("socket", &self.socket)
            .field("user_context", &self.user_context.is_some())
            .finish()
    }
}

/// Where a fallback stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPhase {
    /// No fallback running.
    #[default]
    Idle,
    /// A shadow connection to the preferred endpoint is being opened.
    Switching,
    /// The shadow connection is live; the old one still has to be closed.
    Reconnected,
}

#[derive(Debug, Default)]
struct FallbackInner {
    live: ChannelProps,
    shadow: ChannelProps,
    shadowing: bool,
    phase: FallbackPhase,
    retained: Option<TransportHandle>,
    first_time_connect: bool,
}

impl FallbackInner {
    fn active(&mut self) -> &mut ChannelProps {
        if self.shadowing {
            &mut self.shadow
        } else {
            &mut self.live
        }
    }
}

/// # Fallback Context
///
/// Shared between the channel worker (the only writer) and the public
/// `Channel` handles (readers of the live copy).
#[derive(Debug)]
pub struct FallbackContext {
    inner: Mutex<FallbackInner>,
}

impl Default for FallbackContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FallbackContext {
    /// Creates an idle context in the `Unknown` state.
    pub fn new(user_context: Option<UserContext>) -> Self {
        Self {
            inner: Mutex::new(FallbackInner {
                live: ChannelProps {
                    user_context,
                    ..ChannelProps::default()
                },
                first_time_connect: true,
                ..FallbackInner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FallbackInner> {
        self.inner.lock().expect("fallback context lock poisoned")
    }

    // ---- routed access: shadow while a fallback is switching, live otherwise ----

    /// State of the active copy.
    pub fn state(&self) -> ChannelState {
        self.lock().active().state
    }

    /// Sets the state of the active copy.
    pub fn set_state(&self, state: ChannelState) {
        self.lock().active().state = state;
    }

    /// Connection of the active copy.
    pub fn transport(&self) -> Option<TransportHandle> {
        self.lock().active().transport.clone()
    }

    /// Replaces the connection of the active copy and returns the previous one.
    pub fn set_transport(&self, transport: Option<TransportHandle>) -> Option<TransportHandle> {
        let mut inner = self.lock();
        let active = inner.active();
        active.socket = transport.as_ref().and_then(TransportHandle::peer_addr);
        std::mem::replace(&mut active.transport, transport)
    }

    // ---- observer reads: always the live copy ----

    /// State the application sees.
    pub fn live_state(&self) -> ChannelState {
        self.lock().live.state
    }

    /// Connection the application talks through.
    pub fn live_transport(&self) -> Option<TransportHandle> {
        self.lock().live.transport.clone()
    }

    /// Remote address of the live connection.
    pub fn live_socket(&self) -> Option<SocketAddr> {
        self.lock().live.socket
    }

    /// Application data as seen by the application.
    pub fn live_user_context(&self) -> Option<UserContext> {
        self.lock().live.user_context.clone()
    }

    /// Replaces the application data on both copies so it survives any
    /// switchover outcome.
    pub fn replace_user_context(&self, user_context: Option<UserContext>) {
        let mut inner = self.lock();
        inner.live.user_context = user_context.clone();
        inner.shadow.user_context = user_context;
    }

    /// Current fallback phase.
    pub fn phase(&self) -> FallbackPhase {
        self.lock().phase
    }

    /// Whether a fallback is in flight.
    pub fn is_switching(&self) -> bool {
        self.lock().phase != FallbackPhase::Idle
    }

    /// Whether routed writes currently land on the shadow copy.
    pub fn is_shadowing(&self) -> bool {
        self.lock().shadowing
    }

    /// True until the channel has been up once.
    pub fn is_first_time_connect(&self) -> bool {
        self.lock().first_time_connect
    }

    /// Records that the channel has been up at least once.
    pub fn mark_connected(&self) {
        self.lock().first_time_connect = false;
    }

    /// Starts a fallback: the live properties are copied into the shadow and
    /// routed writes go there from now on. Returns `false` when a fallback is
    /// already running.
    pub fn begin_fallback(&self) -> bool {
        let mut inner = self.lock();
        if inner.phase != FallbackPhase::Idle {
            return false;
        }
        inner.shadow = inner.live.clone();
        inner.shadowing = true;
        inner.phase = FallbackPhase::Switching;
        true
    }

    /// The shadow connection is up: its properties become the live ones and
    /// routing returns to the live copy. The previous live connection is kept
    /// aside until `switchover_complete`.
    pub fn reconnection_complete(&self) -> bool {
        let mut inner = self.lock();
        if inner.phase != FallbackPhase::Switching {
            return false;
        }
        let shadow = std::mem::take(&mut inner.shadow);
        let previous = std::mem::replace(&mut inner.live, shadow);
        inner.retained = previous.transport;
        inner.shadowing = false;
        inner.phase = FallbackPhase::Reconnected;
        true
    }

    /// Finishes a successful fallback and hands back the old connection for
    /// the caller to close.
    pub fn switchover_complete(&self) -> Option<TransportHandle> {
        let mut inner = self.lock();
        if inner.phase != FallbackPhase::Reconnected {
            return None;
        }
        inner.phase = FallbackPhase::Idle;
        inner.retained.take()
    }

    /// Abandons a fallback that has not reconnected yet. The live copy was
    /// never touched; the shadow connection, when it is a different one, is
    /// handed back for the caller to close. Has no effect outside `Switching`.
    pub fn rollback(&self) -> Option<TransportHandle> {
        let mut inner = self.lock();
        if inner.phase != FallbackPhase::Switching {
            return None;
        }
        let shadow = std::mem::take(&mut inner.shadow);
        inner.shadowing = false;
        inner.phase = FallbackPhase::Idle;

        let live_id = inner.live.transport.as_ref().map(TransportHandle::id);
        shadow
            .transport
            .filter(|transport| Some(transport.id()) != live_id)
    }
}
