//! Connection State
//!
//! The shared `ConnectionState` is written only through a [`StateHub`],
//! which applies the events reported by the tunnel strategy. Events carry
//! the tunnel id they belong to; once a tunnel is tracked, events from any
//! other installation are dropped.

use crate::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tunnel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TunnelStatus {
    /// No tunnel running
    #[default]
    Disconnected,
    /// Tunnel starting
    Connecting,
    /// Tunnel established
    Connected,
    /// Tunnel stopping
    Disconnecting,
}

impl TunnelStatus {
    /// Whether the tunnel is established
    pub fn is_connected(&self) -> bool {
        matches!(self, TunnelStatus::Connected)
    }

    /// Whether an error reported with this status is kept
    fn carries_error(&self) -> bool {
        matches!(self, TunnelStatus::Disconnecting | TunnelStatus::Disconnected)
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Disconnected => write!(f, "disconnected"),
            TunnelStatus::Connecting => write!(f, "connecting"),
            TunnelStatus::Connected => write!(f, "connected"),
            TunnelStatus::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Byte counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataCount {
    /// Bytes received through the tunnel
    pub received: u64,
    /// Bytes sent through the tunnel
    pub sent: u64,
}

/// Unified connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    /// User intent, independent of the transient status
    pub is_enabled: bool,
    /// Current tunnel status
    pub status: TunnelStatus,
    /// Last failure, cleared by the next tunnel action
    pub last_error: Option<Error>,
    /// Present only while connected
    pub data_count: Option<DataCount>,
}

/// Event reported by a tunnel strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// Status transition of the tunnel
    StatusChanged {
        /// Tunnel installation the event belongs to
        tunnel_id: String,
        /// New status
        status: TunnelStatus,
        /// Whether the tunnel is enabled
        is_enabled: bool,
        /// Error reported along with the transition
        error: Option<String>,
    },
    /// Configuration replaced without a reconnect
    Reinstalled {
        tunnel_id: String,
        is_enabled: bool,
    },
    /// Tunnel action failed
    Failed {
        tunnel_id: String,
        /// Failure description
        error: String,
        is_enabled: bool,
    },
    /// Byte counters sampled while connected
    DataCount {
        tunnel_id: String,
        count: DataCount,
    },
}

impl TunnelEvent {
    /// Tunnel installation the event belongs to
    pub fn tunnel_id(&self) -> &str {
        match self {
            TunnelEvent::StatusChanged { tunnel_id, .. }
            | TunnelEvent::Reinstalled { tunnel_id, .. }
            | TunnelEvent::Failed { tunnel_id, .. }
            | TunnelEvent::DataCount { tunnel_id, .. } => tunnel_id,
        }
    }
}

struct HubInner {
    /// Published state
    state: watch::Sender<ConnectionState>,
    /// Tunnel id events are accepted from
    tracked: Mutex<Option<String>>,
}

/// Single writer of the connection state
#[derive(Clone)]
pub struct StateHub {
    inner: Arc<HubInner>,
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: watch::Sender::new(ConnectionState::default()),
                tracked: Mutex::new(None),
            }),
        }
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Current state
    pub fn snapshot(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Only accept events of `tunnel_id` from now on
    pub fn track(&self, tunnel_id: &str) {
        if let Ok(mut tracked) = self.inner.tracked.lock() {
            if tracked.as_deref() != Some(tunnel_id) {
                debug!("Tracking tunnel {}", tunnel_id);
                *tracked = Some(tunnel_id.to_string());
            }
        }
    }

    pub fn tracked_id(&self) -> Option<String> {
        self.inner.tracked.lock().ok().and_then(|t| t.clone())
    }

    /// Apply a strategy event, returning whether it was accepted
    pub fn emit(&self, event: TunnelEvent) -> bool {
        if !self.accepts(&event) {
            debug!("Dropping event of stale tunnel {}", event.tunnel_id());
            return false;
        }

        self.inner.state.send_if_modified(|state| {
            let before = state.clone();
            apply(state, event);
            *state != before
        });
        true
    }

    fn accepts(&self, event: &TunnelEvent) -> bool {
        let Ok(mut tracked) = self.inner.tracked.lock() else {
            return false;
        };
        match tracked.as_deref() {
            Some(id) => id == event.tunnel_id(),
            None if matches!(event, TunnelEvent::StatusChanged { .. }) => {
                debug!("Adopting tunnel {}", event.tunnel_id());
                *tracked = Some(event.tunnel_id().to_string());
                true
            }
            None => false,
        }
    }

    pub fn set_last_error(&self, error: Error) {
        self.inner.state.send_if_modified(|state| {
            let modified = state.last_error.as_ref() != Some(&error);
            state.last_error = Some(error);
            modified
        });
    }

    pub fn clear_last_error(&self) {
        self.inner.state.send_if_modified(|state| state.last_error.take().is_some());
    }
}

fn apply(state: &mut ConnectionState, event: TunnelEvent) {
    match event {
        TunnelEvent::StatusChanged {
            status,
            is_enabled,
            error,
            ..
        } => {
            if state.status != status {
                info!("Tunnel {}", status);
            }
            state.is_enabled = is_enabled;
            state.status = status;
            if status.carries_error() {
                if let Some(error) = error {
                    state.last_error = Some(Error::StrategyFailure(error));
                }
            }
            if status == TunnelStatus::Disconnected {
                state.data_count = None;
            }
        }
        TunnelEvent::Reinstalled { is_enabled, .. } => {
            debug!("Tunnel reinstalled (enabled: {})", is_enabled);
            state.is_enabled = is_enabled;
        }
        TunnelEvent::Failed {
            error, is_enabled, ..
        } => {
            warn!("Tunnel failed: {}", error);
            state.last_error = Some(Error::StrategyFailure(error));
            state.status = TunnelStatus::Disconnected;
            state.is_enabled = is_enabled;
            state.data_count = None;
        }
        TunnelEvent::DataCount { count, .. } => {
            if state.status.is_connected() {
                state.data_count = Some(count);
            }
        }
    }
}
