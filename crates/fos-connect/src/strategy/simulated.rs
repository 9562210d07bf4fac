//! Simulated tunnel
//!
//! Walks through the same status transitions a real tunnel would, with
//! configurable delays, and feeds a synthetic byte counter while
//! connected. Every call is recorded for inspection.

use super::TunnelStrategy;
use crate::builder::TunnelConfiguration;
use crate::config::SimulationConfig;
use crate::state::{DataCount, StateHub, TunnelEvent, TunnelStatus};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Call received by the simulated strategy
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyCall {
    /// Configuration replaced in place
    Reinstate(TunnelConfiguration),
    /// Fresh configuration installed and started
    Connect(TunnelConfiguration),
    /// Installed configuration restarted
    Reconnect,
    /// Tunnel stopped
    Disconnect,
    /// Tunnel registration removed
    RemoveConfigurations,
}

#[derive(Default)]
struct SimulatedTunnel {
    /// Receiver of the tunnel events
    hub: Option<StateHub>,
    /// Installed configuration
    configuration: Option<TunnelConfiguration>,
    is_enabled: bool,
    status: TunnelStatus,
    /// Byte counter task, running while connected
    ticker: Option<JoinHandle<()>>,
    /// Every call received
    calls: Vec<StrategyCall>,
    /// Every status reached
    transitions: Vec<TunnelStatus>,
    /// Failure reported by the next connect
    next_failure: Option<String>,
}

/// Tunnel strategy without a tunnel
pub struct SimulatedStrategy {
    /// Transition delays and counter interval
    timings: SimulationConfig,
    /// Simulated tunnel state
    tunnel: Mutex<SimulatedTunnel>,
}

impl SimulatedStrategy {
    pub fn new(timings: SimulationConfig) -> Self {
        Self {
            timings,
            tunnel: Mutex::new(SimulatedTunnel::default()),
        }
    }

    /// Every call so far, oldest first
    pub fn calls(&self) -> Vec<StrategyCall> {
        self.with_tunnel(|t| t.calls.clone()).unwrap_or_default()
    }

    /// Configurations passed to `connect`
    pub fn connected_configurations(&self) -> Vec<TunnelConfiguration> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StrategyCall::Connect(cfg) => Some(cfg),
                _ => None,
            })
            .collect()
    }

    /// Calls that (re)start the tunnel
    pub fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StrategyCall::Connect(_) | StrategyCall::Reconnect))
            .count()
    }

    /// Status transitions emitted so far
    pub fn transitions(&self) -> Vec<TunnelStatus> {
        self.with_tunnel(|t| t.transitions.clone()).unwrap_or_default()
    }

    /// Make the next connection attempt fail with `error`
    pub fn fail_next_connect(&self, error: impl Into<String>) {
        let error = error.into();
        self.with_tunnel(|t| t.next_failure = Some(error));
    }

    fn with_tunnel<T>(&self, f: impl FnOnce(&mut SimulatedTunnel) -> T) -> Option<T> {
        self.tunnel.lock().ok().map(|mut tunnel| f(&mut tunnel))
    }

    fn record(&self, call: StrategyCall) {
        self.with_tunnel(|t| t.calls.push(call));
    }

    fn status(&self) -> TunnelStatus {
        self.with_tunnel(|t| t.status).unwrap_or_default()
    }

    /// Hub and tunnel id to emit to, if observed and installed
    fn target(tunnel: &SimulatedTunnel) -> Option<(StateHub, String)> {
        let hub = tunnel.hub.clone()?;
        let tunnel_id = tunnel.configuration.as_ref()?.tunnel_id.clone();
        Some((hub, tunnel_id))
    }

    fn set_status(&self, status: TunnelStatus, is_enabled: bool) {
        let target = self.with_tunnel(|t| {
            if t.status != status {
                t.transitions.push(status);
            }
            t.status = status;
            t.is_enabled = is_enabled;
            Self::target(t)
        });
        if let Some((hub, tunnel_id)) = target.flatten() {
            hub.emit(TunnelEvent::StatusChanged {
                tunnel_id,
                status,
                is_enabled,
                error: None,
            });
        }
    }

    fn fail(&self, error: String) {
        let target = self.with_tunnel(|t| {
            if t.status != TunnelStatus::Disconnected {
                t.transitions.push(TunnelStatus::Disconnected);
            }
            t.status = TunnelStatus::Disconnected;
            Self::target(t)
        });
        if let Some((hub, tunnel_id)) = target.flatten() {
            hub.emit(TunnelEvent::Failed {
                tunnel_id,
                error,
                is_enabled: true,
            });
        }
    }

    fn stop_ticker(&self) {
        if let Some(ticker) = self.with_tunnel(|t| t.ticker.take()).flatten() {
            ticker.abort();
        }
    }

    fn start_ticker(&self) {
        let period = self.timings.data_count_interval();
        self.with_tunnel(|t| {
            let Some((hub, tunnel_id)) = Self::target(t) else {
                return;
            };
            if let Some(previous) = t.ticker.take() {
                previous.abort();
            }
            t.ticker = Some(tokio::spawn(tick_data_count(hub, tunnel_id, period)));
        });
    }

    async fn restart(&self) {
        self.stop_ticker();

        if self.status() == TunnelStatus::Disconnected {
            self.set_status(TunnelStatus::Disconnected, true);
        } else {
            self.set_status(TunnelStatus::Disconnecting, true);
            tokio::time::sleep(self.timings.transition()).await;
            self.set_status(TunnelStatus::Disconnected, true);
        }

        tokio::time::sleep(self.timings.settle()).await;
        self.set_status(TunnelStatus::Connecting, true);
        tokio::time::sleep(self.timings.transition()).await;

        if let Some(error) = self.with_tunnel(|t| t.next_failure.take()).flatten() {
            warn!("Simulated connection failed: {}", error);
            self.fail(error);
            return;
        }

        self.set_status(TunnelStatus::Connected, true);
        self.start_ticker();
    }
}

async fn tick_data_count(hub: StateHub, tunnel_id: String, period: Duration) {
    let mut count = DataCount::default();
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;
        let (received, sent) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(1_000..200_000), rng.gen_range(500..50_000))
        };
        count.received += received;
        count.sent += sent;
        hub.emit(TunnelEvent::DataCount {
            tunnel_id: tunnel_id.clone(),
            count,
        });
    }
}

#[async_trait]
impl TunnelStrategy for SimulatedStrategy {
    fn observe(&self, hub: StateHub) {
        self.with_tunnel(|t| t.hub = Some(hub));
    }

    async fn reinstate(&self, configuration: &TunnelConfiguration) {
        self.record(StrategyCall::Reinstate(configuration.clone()));
        info!("Reinstating simulated tunnel '{}'", configuration.title);

        let target = self.with_tunnel(|t| {
            t.configuration = Some(configuration.clone());
            t.hub.clone().map(|hub| (hub, t.is_enabled))
        });
        if let Some((hub, is_enabled)) = target.flatten() {
            hub.track(&configuration.tunnel_id);
            hub.emit(TunnelEvent::Reinstalled {
                tunnel_id: configuration.tunnel_id.clone(),
                is_enabled,
            });
        }
    }

    async fn connect(&self, configuration: &TunnelConfiguration) {
        self.record(StrategyCall::Connect(configuration.clone()));
        info!(
            "Connecting simulated tunnel '{}' to {:?}",
            configuration.title,
            configuration.endpoint().map(ToString::to_string)
        );

        let hub = self.with_tunnel(|t| {
            t.configuration = Some(configuration.clone());
            t.hub.clone()
        });
        if let Some(hub) = hub.flatten() {
            hub.track(&configuration.tunnel_id);
        }
        self.restart().await;
    }

    async fn reconnect(&self) {
        self.record(StrategyCall::Reconnect);
        let installed = self.with_tunnel(|t| t.configuration.is_some()).unwrap_or(false);
        if !installed {
            warn!("Nothing to reconnect, no configuration installed");
            return;
        }
        info!("Reconnecting simulated tunnel");
        self.restart().await;
    }

    async fn disconnect(&self) {
        self.record(StrategyCall::Disconnect);
        let (status, is_enabled) = self
            .with_tunnel(|t| (t.status, t.is_enabled))
            .unwrap_or_default();
        if status == TunnelStatus::Disconnected && !is_enabled {
            debug!("Simulated tunnel already disconnected");
            return;
        }

        info!("Disconnecting simulated tunnel");
        self.stop_ticker();
        if status != TunnelStatus::Disconnected {
            self.set_status(TunnelStatus::Disconnecting, false);
            tokio::time::sleep(self.timings.transition()).await;
        }
        self.set_status(TunnelStatus::Disconnected, false);
    }

    async fn remove_configurations(&self) {
        self.record(StrategyCall::RemoveConfigurations);
        info!("Removing simulated tunnel configuration");
        self.stop_ticker();
        self.set_status(TunnelStatus::Disconnected, false);
        self.with_tunnel(|t| t.configuration = None);
    }
}

impl Drop for SimulatedStrategy {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
