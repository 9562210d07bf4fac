//! fOS Connect - VPN Tunnel Orchestration
//!
//! Keeps a platform tunnel in sync with the user's VPN profiles.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         AppContext                           │
//! │                                                              │
//! │  ┌─────────────────────┐  events  ┌───────────────────────┐  │
//! │  │ ProfileOrchestrator │─────────▶│ ConnectionOrchestrator│  │
//! │  │ (active / current)  │          │ (state machine, diff) │  │
//! │  └─────────┬───────────┘          └──────────┬────────────┘  │
//! │            │                                 │               │
//! │  ┌─────────▼───────────┐          ┌──────────▼────────────┐  │
//! │  │ ProfileStore        │          │ ConfigurationBuilder  │  │
//! │  │ ProviderCatalog     │          │ TunnelStrategy        │  │
//! │  │ SecretVault         │          │ (simulated, platform) │  │
//! │  └─────────────────────┘          └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Host and provider profiles**: OpenVPN and WireGuard
//! - **Change classification**: endpoint edits reconnect, on-demand edits
//!   reinstall, anything else leaves the tunnel alone
//! - **Single state writer**: stale tunnel events are dropped
//! - **Pluggable backends**: store, catalog, vault and tunnel are traits

mod builder;
mod config;
mod context;
mod diff;
mod error;
mod keys;
mod manager;
mod preferences;
mod profile;
mod profile_manager;
mod provider;
mod state;
mod store;
mod strategy;
mod vault;

pub use builder::{
    ConfigError, ConfigurationBuilder, FeatureFlags, InterfaceMatch, OnDemandAction,
    OnDemandRule, OpenVpnTunnel, PullMask, RoutingPolicy, TunnelConfiguration, TunnelSettings,
    WireGuardTunnel,
};
pub use config::{OrchestratorConfig, SettingsError, SimulationConfig, TunnelIds};
pub use context::AppContext;
pub use diff::{ProfileChange, classify};
pub use error::{Error, Result};
pub use keys::{KeyError, PrivateKey, PublicKey};
pub use manager::ConnectionOrchestrator;
pub use preferences::{PreferenceValues, Preferences, PreferencesError};
pub use profile::{
    Account, DnsMode, DnsOverride, Endpoint, EndpointError, GatewayOverride, NetworkSettings,
    OnDemand, OpenVpnSettings, Profile, ProfileHeader, ProtocolSettings, ProviderSelection,
    ProxyOverride, SocketType, VpnProtocol, WireGuardPeer, WireGuardSettings, unique_name,
};
pub use profile_manager::{CurrentUpdate, ProfileEvent, ProfileOrchestrator};
pub use provider::{
    CatalogError, CatalogIndex, PresetEndpoint, PresetTemplate, ProviderCatalog,
    ProviderInfrastructure, ProviderMetadata, ProviderPreset, ProviderServer,
    StaticProviderCatalog,
};
pub use state::{ConnectionState, DataCount, StateHub, TunnelEvent, TunnelStatus};
pub use store::{MemoryProfileStore, ProfileMap, ProfileStore, StoreError};
pub use strategy::{
    ControllerError, ControllerNotification, PlatformStrategy, SimulatedStrategy, StrategyCall,
    TunnelController, TunnelStrategy,
};
pub use vault::{MemoryVault, SecretKey, SecretRef, SecretVault, VaultError};
