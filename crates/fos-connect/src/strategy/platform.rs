//! Platform tunnel strategy
//!
//! Drives the operating system tunnel through a [`TunnelController`] and
//! turns its notifications into [`TunnelEvent`]s. Byte counters are
//! polled from the controller while the tunnel is connected.

use super::TunnelStrategy;
use crate::builder::TunnelConfiguration;
use crate::state::{DataCount, StateHub, TunnelEvent, TunnelStatus};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Notification from the platform tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerNotification {
    Status {
        tunnel_id: String,
        status: TunnelStatus,
        is_enabled: bool,
        error: Option<String>,
    },
    Reinstalled {
        tunnel_id: String,
        is_enabled: bool,
    },
}

/// Platform tunnel control surface
#[async_trait]
pub trait TunnelController: Send + Sync + 'static {
    /// Load existing installations
    async fn prepare(&self);

    /// Install or replace the configuration
    async fn install(&self, configuration: &TunnelConfiguration) -> Result<(), ControllerError>;

    /// Install `configuration` and restart the tunnel after `after`
    async fn reconnect_with(
        &self,
        configuration: &TunnelConfiguration,
        after: Duration,
    ) -> Result<(), ControllerError>;

    /// Restart the installed tunnel after `after`
    async fn reconnect(&self, after: Duration) -> Result<(), ControllerError>;

    async fn disconnect(&self);

    async fn uninstall(&self);

    /// Byte counters of a running tunnel
    async fn data_count(&self, tunnel_id: &str) -> Option<DataCount>;

    fn subscribe(&self) -> broadcast::Receiver<ControllerNotification>;
}

/// Controller errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("Unable to install tunnel: {0}")]
    Install(String),

    #[error("Unable to start tunnel: {0}")]
    Start(String),

    #[error("No tunnel installed")]
    NotInstalled,
}

/// Strategy backed by the platform tunnel
pub struct PlatformStrategy<C: TunnelController> {
    controller: Arc<C>,
    reconnection_delay: Duration,
    data_count_interval: Duration,
    hub: Mutex<Option<StateHub>>,
    current_tunnel: Mutex<Option<String>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl<C: TunnelController> PlatformStrategy<C> {
    pub fn new(controller: C) -> Self {
        Self {
            controller: Arc::new(controller),
            reconnection_delay: Duration::from_secs(2),
            data_count_interval: Duration::from_secs(3),
            hub: Mutex::new(None),
            current_tunnel: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    pub fn with_reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay = delay;
        self
    }

    pub fn with_data_count_interval(mut self, interval: Duration) -> Self {
        self.data_count_interval = interval;
        self
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    fn hub(&self) -> Option<StateHub> {
        self.hub.lock().ok().and_then(|hub| hub.clone())
    }

    fn select_tunnel(&self, configuration: &TunnelConfiguration) {
        if let Ok(mut current) = self.current_tunnel.lock() {
            *current = Some(configuration.tunnel_id.clone());
        }
        if let Some(hub) = self.hub() {
            hub.track(&configuration.tunnel_id);
        }
    }

    fn report(&self, err: ControllerError) {
        error!("Tunnel controller error: {}", err);
        let tunnel_id = self.current_tunnel.lock().ok().and_then(|t| t.clone());
        if let (Some(hub), Some(tunnel_id)) = (self.hub(), tunnel_id) {
            let is_enabled = hub.snapshot().is_enabled;
            hub.emit(TunnelEvent::Failed {
                tunnel_id,
                error: err.to_string(),
                is_enabled,
            });
        }
    }
}

async fn forward_notifications<C: TunnelController>(
    controller: Arc<C>,
    hub: StateHub,
    mut notifications: broadcast::Receiver<ControllerNotification>,
    data_count_interval: Duration,
) {
    controller.prepare().await;
    let mut poller: Option<JoinHandle<()>> = None;

    loop {
        let notification = match notifications.recv().await {
            Ok(notification) => notification,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {} tunnel notifications", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match notification {
            ControllerNotification::Status {
                tunnel_id,
                status,
                is_enabled,
                error,
            } => {
                let accepted = hub.emit(TunnelEvent::StatusChanged {
                    tunnel_id: tunnel_id.clone(),
                    status,
                    is_enabled,
                    error,
                });
                if !accepted {
                    continue;
                }
                match status {
                    TunnelStatus::Connected => {
                        if let Some(previous) = poller.take() {
                            previous.abort();
                        }
                        poller = Some(tokio::spawn(poll_data_count(
                            controller.clone(),
                            hub.clone(),
                            tunnel_id,
                            data_count_interval,
                        )));
                    }
                    TunnelStatus::Disconnected => {
                        if let Some(previous) = poller.take() {
                            previous.abort();
                        }
                    }
                    _ => {}
                }
            }
            ControllerNotification::Reinstalled {
                tunnel_id,
                is_enabled,
            } => {
                hub.emit(TunnelEvent::Reinstalled {
                    tunnel_id,
                    is_enabled,
                });
            }
        }
    }

    if let Some(poller) = poller {
        poller.abort();
    }
    debug!("Tunnel notifications closed");
}

async fn poll_data_count<C: TunnelController>(
    controller: Arc<C>,
    hub: StateHub,
    tunnel_id: String,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Some(count) = controller.data_count(&tunnel_id).await {
            hub.emit(TunnelEvent::DataCount {
                tunnel_id: tunnel_id.clone(),
                count,
            });
        }
    }
}

#[async_trait]
impl<C: TunnelController> TunnelStrategy for PlatformStrategy<C> {
    fn observe(&self, hub: StateHub) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, tunnel notifications will not be observed");
            return;
        };
        if let Ok(mut current) = self.hub.lock() {
            *current = Some(hub.clone());
        }

        let task = runtime.spawn(forward_notifications(
            self.controller.clone(),
            hub,
            self.controller.subscribe(),
            self.data_count_interval,
        ));
        if let Ok(mut forwarder) = self.forwarder.lock() {
            if let Some(previous) = forwarder.replace(task) {
                previous.abort();
            }
        }
    }

    async fn reinstate(&self, configuration: &TunnelConfiguration) {
        self.select_tunnel(configuration);
        info!("Reinstating tunnel '{}'", configuration.title);
        if let Err(err) = self.controller.install(configuration).await {
            self.report(err);
        }
    }

    async fn connect(&self, configuration: &TunnelConfiguration) {
        self.select_tunnel(configuration);
        info!("Reconnecting tunnel '{}'", configuration.title);
        if let Err(err) = self
            .controller
            .reconnect_with(configuration, self.reconnection_delay)
            .await
        {
            self.report(err);
        }
    }

    async fn reconnect(&self) {
        if let Err(err) = self.controller.reconnect(self.reconnection_delay).await {
            self.report(err);
        }
    }

    async fn disconnect(&self) {
        self.controller.disconnect().await;
    }

    async fn remove_configurations(&self) {
        self.controller.uninstall().await;

        // uninstall is not reliably notified
        let tunnel_id = self.current_tunnel.lock().ok().and_then(|t| t.clone());
        if let (Some(hub), Some(tunnel_id)) = (self.hub(), tunnel_id) {
            hub.emit(TunnelEvent::Reinstalled {
                tunnel_id,
                is_enabled: false,
            });
        }
    }
}

impl<C: TunnelController> Drop for PlatformStrategy<C> {
    fn drop(&mut self) {
        if let Ok(mut forwarder) = self.forwarder.lock() {
            if let Some(task) = forwarder.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ConfigurationBuilder;
    use crate::config::OrchestratorConfig;
    use crate::error::Error;
    use crate::profile::{Endpoint, OpenVpnSettings, Profile, ProtocolSettings};
    use crate::provider::{CatalogIndex, StaticProviderCatalog};
    use crate::vault::MemoryVault;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeController {
        notifications: broadcast::Sender<ControllerNotification>,
        calls: Mutex<Vec<&'static str>>,
        fails_install: AtomicBool,
        received: AtomicU64,
    }

    impl FakeController {
        fn new() -> Self {
            let (notifications, _) = broadcast::channel(16);
            Self {
                notifications,
                calls: Mutex::new(Vec::new()),
                fails_install: AtomicBool::new(false),
                received: AtomicU64::new(0),
            }
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn notify(&self, tunnel_id: &str, status: TunnelStatus, is_enabled: bool) {
            let _ = self.notifications.send(ControllerNotification::Status {
                tunnel_id: tunnel_id.into(),
                status,
                is_enabled,
                error: None,
            });
        }
    }

    #[async_trait]
    impl TunnelController for FakeController {
        async fn prepare(&self) {
            self.record("prepare");
        }

        async fn install(&self, _configuration: &TunnelConfiguration) -> Result<(), ControllerError> {
            self.record("install");
            if self.fails_install.load(Ordering::SeqCst) {
                return Err(ControllerError::Install("permission denied".into()));
            }
            Ok(())
        }

        async fn reconnect_with(
            &self,
            configuration: &TunnelConfiguration,
            _after: Duration,
        ) -> Result<(), ControllerError> {
            self.record("reconnect_with");
            self.notify(&configuration.tunnel_id, TunnelStatus::Connecting, true);
            self.notify(&configuration.tunnel_id, TunnelStatus::Connected, true);
            Ok(())
        }

        async fn reconnect(&self, _after: Duration) -> Result<(), ControllerError> {
            self.record("reconnect");
            Err(ControllerError::NotInstalled)
        }

        async fn disconnect(&self) {
            self.record("disconnect");
        }

        async fn uninstall(&self) {
            self.record("uninstall");
        }

        async fn data_count(&self, _tunnel_id: &str) -> Option<DataCount> {
            let received = self.received.fetch_add(100, Ordering::SeqCst) + 100;
            Some(DataCount { received, sent: received / 2 })
        }

        fn subscribe(&self) -> broadcast::Receiver<ControllerNotification> {
            self.notifications.subscribe()
        }
    }

    fn configuration() -> TunnelConfiguration {
        let profile = Profile::host(
            "Office",
            ProtocolSettings::OpenVpn(OpenVpnSettings {
                remotes: vec![Endpoint::new("1.2.3.4", 1194)],
                ..OpenVpnSettings::default()
            }),
        );
        ConfigurationBuilder::new(&OrchestratorConfig::default())
            .build(
                &profile,
                &StaticProviderCatalog::new(CatalogIndex::default()),
                &MemoryVault::new(),
            )
            .unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn observed() -> (PlatformStrategy<FakeController>, StateHub) {
        let strategy = PlatformStrategy::new(FakeController::new());
        let hub = StateHub::new();
        strategy.observe(hub.clone());
        (strategy, hub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_forwards_status() {
        let (strategy, hub) = observed();
        settle().await;

        strategy.connect(&configuration()).await;
        settle().await;

        let state = hub.snapshot();
        assert!(state.is_enabled);
        assert_eq!(state.status, TunnelStatus::Connected);
        let calls = strategy.controller().calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["prepare", "reconnect_with"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_count_polled_while_connected() {
        let (strategy, hub) = observed();
        settle().await;
        strategy.connect(&configuration()).await;

        tokio::time::sleep(Duration::from_millis(3100)).await;
        let count = hub.snapshot().data_count.unwrap();
        assert!(count.received >= 200);

        strategy
            .controller()
            .notify("com.fos.connect.openvpn", TunnelStatus::Disconnected, false);
        settle().await;
        assert!(hub.snapshot().data_count.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tunnel_notifications_dropped() {
        let (strategy, hub) = observed();
        settle().await;
        strategy.connect(&configuration()).await;
        settle().await;

        strategy
            .controller()
            .notify("com.other.tunnel", TunnelStatus::Disconnected, false);
        settle().await;

        assert_eq!(hub.snapshot().status, TunnelStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_failure_reported() {
        let (strategy, hub) = observed();
        settle().await;
        strategy.controller().fails_install.store(true, Ordering::SeqCst);

        strategy.reinstate(&configuration()).await;

        let state = hub.snapshot();
        assert_eq!(
            state.last_error,
            Some(Error::StrategyFailure(
                "Unable to install tunnel: permission denied".into()
            ))
        );
        assert_eq!(state.status, TunnelStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_configurations_forces_disabled() {
        let (strategy, hub) = observed();
        settle().await;
        strategy.connect(&configuration()).await;
        settle().await;

        strategy.remove_configurations().await;

        assert!(!hub.snapshot().is_enabled);
    }
}
