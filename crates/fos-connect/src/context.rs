//! Application context
//!
//! Owns both orchestrators and routes profile events into the connection
//! orchestrator. Every operation drains the store feed, completes finished
//! profile loads and dispatches the resulting events before returning, so
//! callers observe a settled state.

use crate::builder::ConfigurationBuilder;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::manager::ConnectionOrchestrator;
use crate::preferences::Preferences;
use crate::profile::Profile;
use crate::profile_manager::{CurrentUpdate, ProfileEvent, ProfileOrchestrator};
use crate::provider::ProviderCatalog;
use crate::state::ConnectionState;
use crate::store::ProfileStore;
use crate::strategy::{SimulatedStrategy, TunnelStrategy};
use crate::vault::SecretVault;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Owner of the orchestrators
pub struct AppContext {
    /// Loaded configuration
    config: OrchestratorConfig,
    /// Active and current profiles
    profiles: ProfileOrchestrator,
    /// Tunnel state machine
    connection: ConnectionOrchestrator,
}

impl AppContext {
    /// Context over the given backends
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ProfileStore>,
        catalog: Arc<dyn ProviderCatalog>,
        vault: Arc<dyn SecretVault>,
        strategy: Arc<dyn TunnelStrategy>,
        preferences: Preferences,
    ) -> Self {
        let mut builder = ConfigurationBuilder::new(&config);
        builder.apply_preferences(preferences.values());

        let connection = ConnectionOrchestrator::new(
            strategy,
            catalog.clone(),
            vault.clone(),
            builder,
            config.toggle_rate_limit(),
        );
        let profiles = ProfileOrchestrator::new(store, catalog, vault, preferences);
        info!(
            "Context ready, active profile: {:?}",
            profiles.active_profile_id()
        );

        Self {
            config,
            profiles,
            connection,
        }
    }

    /// Context driving a [`SimulatedStrategy`] timed by `config`
    pub fn simulated(
        config: OrchestratorConfig,
        store: Arc<dyn ProfileStore>,
        catalog: Arc<dyn ProviderCatalog>,
        vault: Arc<dyn SecretVault>,
        preferences: Preferences,
    ) -> (Self, Arc<SimulatedStrategy>) {
        let strategy = Arc::new(SimulatedStrategy::new(config.simulation.clone()));
        let context = Self::new(config, store, catalog, vault, strategy.clone(), preferences);
        (context, strategy)
    }

    /// Orchestrator configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Profile orchestrator
    pub fn profiles(&self) -> &ProfileOrchestrator {
        &self.profiles
    }

    /// Connection orchestrator
    pub fn connection(&self) -> &ConnectionOrchestrator {
        &self.connection
    }

    /// Snapshot of the connection state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Apply pending store changes and profile loads, then dispatch events
    pub async fn sync(&mut self) -> Result<()> {
        loop {
            let mut changed = match self.profiles.sync_store() {
                Ok(changed) => changed,
                Err(e) => {
                    self.dispatch().await;
                    return Err(e);
                }
            };
            if let Some(loaded) = self.profiles.poll_loading().await {
                changed = true;
                if let Err(e) = loaded {
                    self.dispatch().await;
                    return Err(e);
                }
            }
            self.dispatch().await;
            if !changed {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self) {
        while let Some(event) = self.profiles.next_event() {
            match event {
                ProfileEvent::ActiveChanged(id) => {
                    debug!("Dispatching active profile change: {:?}", id);
                    self.connection.on_active_changed(id).await;
                }
                ProfileEvent::CurrentChanged(profile) => {
                    debug!("Dispatching current profile change: {}", profile.id);
                    self.connection
                        .on_current_changed(&self.profiles, &profile)
                        .await;
                }
            }
        }
    }

    async fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        let synced = self.sync().await;
        let value = result?;
        synced?;
        Ok(value)
    }

    /// Set or clear the active profile
    pub async fn activate(&mut self, id: Uuid, is_active: bool) -> Result<()> {
        let result = self.profiles.activate(id, is_active);
        self.settle(result).await
    }

    /// Make `id` the current profile
    pub async fn set_current(&mut self, id: Uuid) -> Result<CurrentUpdate> {
        let result = self.profiles.set_current(id);
        self.settle(result).await
    }

    /// Wait for the pending current profile to load
    pub async fn finish_loading(&mut self) -> Result<CurrentUpdate> {
        let result = self.profiles.finish_loading().await;
        self.settle(result).await
    }

    /// Edit the current profile in memory
    pub async fn update_current(&mut self, change: impl FnOnce(&mut Profile)) -> Result<()> {
        self.profiles.update_current(change);
        self.sync().await
    }

    /// Save a profile
    pub async fn save(&mut self, profile: Profile) -> Result<()> {
        let result = self.profiles.save(profile);
        self.settle(result).await
    }

    /// Save the current profile
    pub async fn persist(&mut self) -> Result<()> {
        let result = self.profiles.persist();
        self.settle(result).await
    }

    /// Copy a profile
    pub async fn duplicate(&mut self, id: Uuid, set_as_current: bool) -> Result<Profile> {
        let result = self.profiles.duplicate(id, set_as_current);
        self.settle(result).await
    }

    /// Delete profiles
    pub async fn remove(&mut self, ids: &[Uuid]) -> Result<()> {
        self.profiles.remove(ids);
        self.sync().await
    }

    /// Connect a profile
    pub async fn connect(&mut self, id: Uuid, new_password: Option<&str>) -> Result<()> {
        let result = self
            .connection
            .connect(&mut self.profiles, id, new_password)
            .await;
        self.settle(result).await
    }

    /// Connect a provider profile to a server
    pub async fn connect_to_server(&mut self, id: Uuid, server_id: &str) -> Result<()> {
        let result = self
            .connection
            .connect_to_server(&mut self.profiles, id, server_id)
            .await;
        self.settle(result).await
    }

    /// Connect the active profile
    pub async fn connect_active(&mut self, to_server: Option<&str>) -> Result<()> {
        let result = self
            .connection
            .connect_active(&mut self.profiles, to_server)
            .await;
        self.settle(result).await
    }

    /// Edit the active profile
    pub async fn modify_active(&mut self, change: impl FnOnce(&mut Profile)) -> Result<()> {
        let result = self
            .connection
            .modify_active(&mut self.profiles, change)
            .await;
        self.settle(result).await
    }

    /// Restart the tunnel
    pub async fn reconnect(&mut self) -> Result<()> {
        self.connection.reconnect().await;
        self.sync().await
    }

    /// Stop the tunnel
    pub async fn disable(&mut self) -> Result<()> {
        self.connection.disable().await;
        self.sync().await
    }

    /// Remove the tunnel registration
    pub async fn uninstall(&mut self) -> Result<()> {
        self.connection.uninstall().await;
        self.sync().await
    }

    /// Enable or disable the VPN
    pub async fn toggle(&mut self) -> Result<bool> {
        let result = self.connection.toggle(&mut self.profiles).await;
        self.settle(result).await
    }

    /// Mask private data in tunnel logs
    pub fn set_masks_private_data(&mut self, masks: bool) -> Result<()> {
        self.profiles.preferences_mut().set_masks_private_data(masks)?;
        self.connection
            .apply_preferences(self.profiles.preferences().values());
        Ok(())
    }

    /// Line format of the tunnel log
    pub fn set_tunnel_log_format(&mut self, format: Option<String>) -> Result<()> {
        self.profiles.preferences_mut().set_tunnel_log_format(format)?;
        self.connection
            .apply_preferences(self.profiles.preferences().values());
        Ok(())
    }

    /// Wait for an external store change and apply it
    pub async fn wait_store_change(&mut self) -> Result<bool> {
        let result = self.profiles.wait_store_change().await;
        self.settle(result).await
    }
}
