//! Tunnel Strategies
//!
//! A strategy is the platform's tunnel control surface. It never reports
//! failures to the caller; everything it observes, errors included, is
//! emitted into the [`StateHub`] handed to [`TunnelStrategy::observe`].
//!
//! - [`SimulatedStrategy`] reproduces realistic timings without touching
//!   the network.
//! - [`PlatformStrategy`] drives a [`TunnelController`].

mod platform;
mod simulated;

pub use platform::{ControllerError, ControllerNotification, PlatformStrategy, TunnelController};
pub use simulated::{SimulatedStrategy, StrategyCall};

use crate::builder::TunnelConfiguration;
use crate::state::StateHub;
use async_trait::async_trait;

/// Platform tunnel control
#[async_trait]
pub trait TunnelStrategy: Send + Sync {
    /// Start reporting status into `hub`
    fn observe(&self, hub: StateHub);

    /// Install a new configuration without tearing the session down
    async fn reinstate(&self, configuration: &TunnelConfiguration);

    /// Install `configuration` and (re)start the tunnel
    async fn connect(&self, configuration: &TunnelConfiguration);

    /// Restart the tunnel with its installed configuration
    async fn reconnect(&self);

    /// Stop the tunnel and clear the enabled flag
    async fn disconnect(&self);

    /// Remove the tunnel installation
    async fn remove_configurations(&self);
}
