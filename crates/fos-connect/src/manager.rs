//! Connection Orchestrator
//!
//! Drives the tunnel strategy from profile changes.
//!
//! # State machine
//!
//! ```text
//! disconnected -> connecting -> connected -> disconnecting -> disconnected
//! ```
//!
//! `is_enabled` is orthogonal to the status and holds the user intent.
//! Edits of the active profile are classified before touching the
//! tunnel: endpoint changes reconnect, on-demand changes reinstall, the
//! rest is ignored.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut connection = ConnectionOrchestrator::new(strategy, catalog, vault, builder, None);
//! connection.connect(&mut profiles, profile_id, None).await?;
//!
//! let mut state = connection.subscribe();
//! while state.changed().await.is_ok() {
//!     println!("{:?}", state.borrow().status);
//! }
//! ```

use crate::builder::{ConfigError, ConfigurationBuilder, TunnelConfiguration};
use crate::diff::{ProfileChange, classify};
use crate::error::{Error, Result};
use crate::preferences::PreferenceValues;
use crate::profile::Profile;
use crate::profile_manager::ProfileOrchestrator;
use crate::provider::ProviderCatalog;
use crate::state::{ConnectionState, StateHub, TunnelStatus};
use crate::strategy::TunnelStrategy;
use crate::vault::SecretVault;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection orchestrator
pub struct ConnectionOrchestrator {
    /// Tunnel backend
    strategy: Arc<dyn TunnelStrategy>,
    /// Provider servers and presets
    catalog: Arc<dyn ProviderCatalog>,
    /// Account passwords
    vault: Arc<dyn SecretVault>,
    /// Profile to configuration mapping
    builder: ConfigurationBuilder,
    /// Writer of the connection state
    hub: StateHub,
    /// Last observed version of the current profile
    last_profile: Profile,
    /// Configuration build failures
    errors: broadcast::Sender<Error>,
    /// Minimum delay between toggles
    toggle_rate_limit: Option<Duration>,
    /// Time of the last accepted toggle
    last_toggle: Option<Instant>,
}

impl ConnectionOrchestrator {
    /// Create an orchestrator observing `strategy`
    pub fn new(
        strategy: Arc<dyn TunnelStrategy>,
        catalog: Arc<dyn ProviderCatalog>,
        vault: Arc<dyn SecretVault>,
        builder: ConfigurationBuilder,
        toggle_rate_limit: Option<Duration>,
    ) -> Self {
        let hub = StateHub::new();
        strategy.observe(hub.clone());
        let (errors, _) = broadcast::channel(16);

        Self {
            strategy,
            catalog,
            vault,
            builder,
            hub,
            last_profile: Profile::placeholder(),
            errors,
            toggle_rate_limit,
            last_toggle: None,
        }
    }

    /// Snapshot of the connection state
    pub fn state(&self) -> ConnectionState {
        self.hub.snapshot()
    }

    /// Subscribe to connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.hub.subscribe()
    }

    /// Configuration build failures, including those of background reconnects
    pub fn configuration_errors(&self) -> broadcast::Receiver<Error> {
        self.errors.subscribe()
    }

    /// Whether the VPN is enabled
    pub fn is_enabled(&self) -> bool {
        self.hub.snapshot().is_enabled
    }

    /// Current tunnel status
    pub fn status(&self) -> TunnelStatus {
        self.hub.snapshot().status
    }

    /// Use `values` for the next configurations
    pub fn apply_preferences(&mut self, values: &PreferenceValues) {
        self.builder.apply_preferences(values);
    }

    /// Connect `id`, optionally replacing the account password
    ///
    /// No-op when the profile is active and connected already.
    pub async fn connect(
        &mut self,
        profiles: &mut ProfileOrchestrator,
        id: Uuid,
        new_password: Option<&str>,
    ) -> Result<()> {
        if profiles.is_active(id) && self.status().is_connected() {
            info!("Profile {} already connected", id);
            return Ok(());
        }

        let (mut profile, is_ready) = profiles.live_profile_ex(id)?;
        self.hub.clear_last_error();
        if !is_ready {
            self.make_ready(profiles, &profile).await?;
        }
        if let Some(password) = new_password {
            profile.account.password = password.to_string();
            profiles.save_password(&profile, password)?;
        }

        let configuration = self.build(&profile)?;
        profiles.activate(id, true)?;

        info!("Connecting {}", profile.log_description());
        self.strategy.connect(&configuration).await;
        Ok(())
    }

    /// Connect a provider profile to `server_id`
    ///
    /// No-op when the profile is active and connected to that server.
    /// When the profile is also the current one, the reconnect is left to
    /// the current profile observer.
    pub async fn connect_to_server(
        &mut self,
        profiles: &mut ProfileOrchestrator,
        id: Uuid,
        server_id: &str,
    ) -> Result<()> {
        let (mut profile, is_ready) = profiles.live_profile_ex(id)?;
        if !profile.is_provider() {
            return Err(Error::NotProvider(id));
        }

        self.hub.clear_last_error();
        if !is_ready {
            self.make_ready(profiles, &profile).await?;
        }
        let Some(server) = self.catalog.server(server_id) else {
            let err = ConfigError::MissingProviderServer(server_id.to_string());
            self.report(&err);
            return Err(err.into());
        };

        if profiles.is_active(id)
            && self.status().is_connected()
            && profile.provider_server_id() == Some(server.id.as_str())
        {
            info!("Profile {} already connected to server {}", id, server_id);
            return Ok(());
        }

        profile.set_provider_server(&server.id, server.first_preset_id_for(profile.protocol()));
        let configuration = self.build(&profile)?;
        profiles.activate(id, true)?;

        let state = self.hub.snapshot();
        let is_current = profiles.is_current(id);
        let deferred = state.is_enabled
            && is_current
            && self.last_profile.id == id
            && classify(&self.last_profile, &profile, state.status) == ProfileChange::Reconnect;

        profiles.save(profile)?;

        if deferred {
            debug!("Reconnect to {} left to the current profile observer", server_id);
            return Ok(());
        }
        if is_current {
            // the observer must not see this edit again
            self.last_profile = profiles.current_profile().clone();
        }
        info!("Connecting {} to server {}", id, server_id);
        self.strategy.connect(&configuration).await;
        Ok(())
    }

    /// Connect the active profile
    pub async fn connect_active(
        &mut self,
        profiles: &mut ProfileOrchestrator,
        to_server: Option<&str>,
    ) -> Result<()> {
        let Some(id) = profiles.active_profile_id() else {
            warn!("No active profile to connect");
            return Ok(());
        };
        match to_server {
            Some(server_id) => self.connect_to_server(profiles, id, server_id).await,
            None if self.status().is_connected() => {
                warn!("Active profile already connected");
                Ok(())
            }
            None => self.connect(profiles, id, None).await,
        }
    }

    /// Edit the active profile in place
    pub async fn modify_active(
        &mut self,
        profiles: &mut ProfileOrchestrator,
        change: impl FnOnce(&mut Profile),
    ) -> Result<()> {
        let Some(id) = profiles.active_profile_id() else {
            debug!("No active profile to modify");
            return Ok(());
        };
        let previous = profiles.live_profile(id)?;
        let mut updated = previous.clone();
        change(&mut updated);
        self.build(&updated)?;

        let observed = profiles.is_current(id) && self.last_profile.id == id;
        profiles.save(updated.clone())?;
        if observed {
            debug!("Edit of {} left to the current profile observer", id);
            return Ok(());
        }

        let state = self.hub.snapshot();
        if !state.is_enabled {
            return Ok(());
        }
        self.apply_change(&previous, &updated, state.status).await
    }

    /// Restart the tunnel with its installed configuration
    pub async fn reconnect(&mut self) {
        info!("Reconnecting");
        self.hub.clear_last_error();
        self.strategy.reconnect().await;
    }

    /// Stop the tunnel and clear the enabled flag
    pub async fn disable(&mut self) {
        info!("Disabling VPN");
        self.hub.clear_last_error();
        self.strategy.disconnect().await;
    }

    /// Remove the tunnel registration
    pub async fn uninstall(&mut self) {
        info!("Uninstalling VPN");
        self.hub.clear_last_error();
        self.strategy.remove_configurations().await;
    }

    /// Disable when enabled, connect the active profile otherwise
    ///
    /// Returns `false` when rate limited or without an active profile.
    pub async fn toggle(&mut self, profiles: &mut ProfileOrchestrator) -> Result<bool> {
        if let (Some(limit), Some(last)) = (self.toggle_rate_limit, self.last_toggle) {
            if last.elapsed() < limit {
                warn!("Toggling too fast, ignoring");
                return Ok(false);
            }
        }
        let Some(id) = profiles.active_profile_id() else {
            warn!("No active profile to toggle");
            return Ok(false);
        };
        self.last_toggle = Some(Instant::now());

        if self.is_enabled() {
            self.disable().await;
        } else {
            self.connect(profiles, id, None).await?;
        }
        Ok(true)
    }

    /// Active profile changed
    pub async fn on_active_changed(&mut self, id: Option<Uuid>) {
        if id.is_none() {
            info!("No active profile, disabling");
            self.disable().await;
        }
    }

    /// Current profile changed, in place or by switching to another one
    pub async fn on_current_changed(&mut self, profiles: &ProfileOrchestrator, profile: &Profile) {
        let previous = std::mem::replace(&mut self.last_profile, profile.clone());
        let state = self.hub.snapshot();

        if !state.is_enabled {
            return;
        }
        if previous.is_placeholder || previous.id != profile.id {
            debug!("Switched current profile, no tunnel action");
            return;
        }
        if !profiles.is_active(profile.id) {
            return;
        }
        // already reported on the error channel
        let _ = self.apply_change(&previous, profile, state.status).await;
    }

    async fn apply_change(
        &mut self,
        previous: &Profile,
        updated: &Profile,
        status: TunnelStatus,
    ) -> Result<()> {
        match classify(previous, updated, status) {
            ProfileChange::Reconnect => {
                info!("Endpoint of {} changed, reconnecting", updated.log_description());
                let configuration = self.build(updated)?;
                self.hub.clear_last_error();
                self.strategy.connect(&configuration).await;
            }
            ProfileChange::Reinstall => {
                info!("On-demand rules of {} changed, reinstalling", updated.log_description());
                let configuration = self.build(updated)?;
                self.hub.clear_last_error();
                self.strategy.reinstate(&configuration).await;
            }
            ProfileChange::None => {
                debug!("No tunnel action for edit of {}", updated.log_description());
            }
        }
        Ok(())
    }

    async fn make_ready(&self, profiles: &ProfileOrchestrator, profile: &Profile) -> Result<()> {
        profiles.make_ready(profile).await.map_err(|err| {
            self.hub.set_last_error(err.clone());
            err
        })
    }

    fn build(&self, profile: &Profile) -> Result<TunnelConfiguration> {
        self.builder
            .build(profile, self.catalog.as_ref(), self.vault.as_ref())
            .map_err(|err| {
                self.report(&err);
                err.into()
            })
    }

    fn report(&self, err: &ConfigError) {
        error!("Unable to build configuration: {}", err);
        let _ = self.errors.send(Error::Config(err.clone()));
    }
}
