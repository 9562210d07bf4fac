//! Provider Catalog
//!
//! Resolves provider names to servers and presets. A provider's
//! infrastructure for a given protocol must be fetched before its
//! profiles can be turned into tunnel configurations.
//!
//! # Catalog file
//!
//! ```toml
//! [[providers]]
//! name = "acme"
//! requires_credentials = true
//!
//! [[providers.presets]]
//! id = "udp"
//! name = "Default UDP"
//! template = { protocol = "openvpn", cipher = "AES-256-GCM", endpoints = [{ port = 1194 }] }
//!
//! [[providers.servers]]
//! id = "nyc1"
//! country_code = "US"
//! addresses = ["10.1.0.1"]
//! preset_ids = ["udp"]
//! ```

use crate::profile::{Endpoint, SocketType, VpnProtocol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Catalog of VPN providers
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    /// Whether infrastructure for `provider_name` and `protocol` is present locally
    fn is_available(&self, provider_name: &str, protocol: VpnProtocol) -> bool;

    /// Fetch infrastructure for `provider_name` and `protocol`
    async fn fetch(&self, provider_name: &str, protocol: VpnProtocol) -> Result<(), CatalogError>;

    /// Look up a locally available server
    fn server(&self, server_id: &str) -> Option<ProviderServer>;

    /// Provider metadata (credentials policy)
    fn metadata(&self, provider_name: &str) -> Option<ProviderMetadata>;
}

/// Provider metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Whether profiles need an account to connect
    #[serde(default)]
    pub requires_credentials: bool,
    /// Password every account of this provider uses
    #[serde(default)]
    pub fixed_password: Option<String>,
}

/// Endpoint template of an OpenVPN preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetEndpoint {
    #[serde(default)]
    pub socket: SocketType,
    pub port: u16,
}

/// Protocol template of a preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum PresetTemplate {
    OpenVpn {
        #[serde(default = "default_cipher")]
        cipher: String,
        #[serde(default)]
        digest: Option<String>,
        #[serde(default)]
        ca: Option<String>,
        endpoints: Vec<PresetEndpoint>,
    },
    WireGuard {
        /// Server public key (base64)
        public_key: String,
        #[serde(default = "default_wireguard_port")]
        port: u16,
    },
}

fn default_cipher() -> String {
    "AES-256-GCM".to_string()
}

fn default_wireguard_port() -> u16 {
    51820
}

impl PresetTemplate {
    pub fn protocol(&self) -> VpnProtocol {
        match self {
            PresetTemplate::OpenVpn { .. } => VpnProtocol::OpenVpn,
            PresetTemplate::WireGuard { .. } => VpnProtocol::WireGuard,
        }
    }
}

/// Connection preset shared by a provider's servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPreset {
    pub id: String,
    pub name: String,
    pub template: PresetTemplate,
}

/// Provider server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderServer {
    pub id: String,
    #[serde(default)]
    pub provider_name: String,
    pub country_code: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    pub preset_ids: Vec<String>,
    /// Presets resolved from `preset_ids`, filled by the catalog
    #[serde(skip)]
    pub presets: Vec<ProviderPreset>,
}

impl ProviderServer {
    pub fn preset(&self, preset_id: &str) -> Option<&ProviderPreset> {
        self.presets.iter().find(|p| p.id == preset_id)
    }

    pub fn first_preset_id(&self) -> Option<&str> {
        self.presets.first().map(|p| p.id.as_str())
    }

    /// First preset usable with `protocol`
    pub fn first_preset_id_for(&self, protocol: VpnProtocol) -> Option<&str> {
        self.presets
            .iter()
            .find(|p| p.template.protocol() == protocol)
            .map(|p| p.id.as_str())
    }

    /// Hosts to connect to, addresses first, hostname as fallback
    pub fn hosts(&self) -> Vec<String> {
        if !self.addresses.is_empty() {
            return self.addresses.clone();
        }
        self.hostname.iter().cloned().collect()
    }

    /// Every host crossed with every endpoint template of `preset`
    pub fn endpoints(&self, preset: &ProviderPreset) -> Vec<Endpoint> {
        let hosts = self.hosts();
        match &preset.template {
            PresetTemplate::OpenVpn { endpoints, .. } => hosts
                .iter()
                .flat_map(|host| {
                    endpoints
                        .iter()
                        .map(move |ep| Endpoint::new(host.clone(), ep.port).with_socket(ep.socket))
                })
                .collect(),
            PresetTemplate::WireGuard { port, .. } => hosts
                .into_iter()
                .map(|host| Endpoint::new(host, *port))
                .collect(),
        }
    }
}

/// Everything known about one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfrastructure {
    #[serde(flatten)]
    pub metadata: ProviderMetadata,
    #[serde(default)]
    pub presets: Vec<ProviderPreset>,
    #[serde(default)]
    pub servers: Vec<ProviderServer>,
}

impl ProviderInfrastructure {
    /// Restrict to `protocol`, resolving each server's presets
    fn for_protocol(&self, protocol: VpnProtocol) -> Option<Self> {
        let presets: Vec<ProviderPreset> = self
            .presets
            .iter()
            .filter(|p| p.template.protocol() == protocol)
            .cloned()
            .collect();
        if presets.is_empty() {
            return None;
        }

        let servers = self
            .servers
            .iter()
            .filter_map(|server| {
                let resolved: Vec<ProviderPreset> = server
                    .preset_ids
                    .iter()
                    .filter_map(|id| presets.iter().find(|p| &p.id == id).cloned())
                    .collect();
                if resolved.is_empty() {
                    return None;
                }
                let mut server = server.clone();
                server.provider_name = self.metadata.name.clone();
                server.presets = resolved;
                Some(server)
            })
            .collect();

        Some(Self {
            metadata: self.metadata.clone(),
            presets,
            servers,
        })
    }
}

/// Catalog file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogIndex {
    #[serde(default)]
    pub providers: Vec<ProviderInfrastructure>,
}

impl CatalogIndex {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, CatalogError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CatalogError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        toml::from_str(content).map_err(|e| CatalogError::ParseError(e.to_string()))
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CatalogError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(content).map_err(|e| CatalogError::ParseError(e.to_string()))
    }
}

/// Catalog serving a fixed index
///
/// Infrastructure starts out remote. `fetch` copies it into the local
/// set after an optional delay, which is what `is_available` and `server`
/// look at.
pub struct StaticProviderCatalog {
    remote: HashMap<String, ProviderInfrastructure>,
    local: RwLock<HashMap<(String, VpnProtocol), ProviderInfrastructure>>,
    fetch_delay: Duration,
    fetch_count: AtomicUsize,
    fails_fetch: AtomicBool,
}

impl StaticProviderCatalog {
    pub fn new(index: CatalogIndex) -> Self {
        let remote = index
            .providers
            .into_iter()
            .map(|infra| (infra.metadata.name.clone(), infra))
            .collect();

        Self {
            remote,
            local: RwLock::new(HashMap::new()),
            fetch_delay: Duration::ZERO,
            fetch_count: AtomicUsize::new(0),
            fails_fetch: AtomicBool::new(false),
        }
    }

    /// Catalog with every provider already fetched
    pub fn with_bundled(index: CatalogIndex) -> Self {
        let catalog = Self::new(index);
        let bundled: Vec<(String, VpnProtocol)> = catalog
            .remote
            .keys()
            .flat_map(|name| {
                [VpnProtocol::OpenVpn, VpnProtocol::WireGuard]
                    .into_iter()
                    .map(move |protocol| (name.clone(), protocol))
            })
            .collect();
        for (name, protocol) in bundled {
            catalog.install(&name, protocol);
        }
        catalog
    }

    /// Simulated network latency of `fetch`
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Make subsequent fetches fail
    pub fn set_fails_fetch(&self, fails: bool) {
        self.fails_fetch.store(fails, Ordering::SeqCst);
    }

    /// Number of `fetch` calls so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn install(&self, provider_name: &str, protocol: VpnProtocol) -> bool {
        let Some(infra) = self
            .remote
            .get(provider_name)
            .and_then(|infra| infra.for_protocol(protocol))
        else {
            return false;
        };
        if let Ok(mut local) = self.local.write() {
            local.insert((provider_name.to_string(), protocol), infra);
        }
        true
    }
}

#[async_trait]
impl ProviderCatalog for StaticProviderCatalog {
    fn is_available(&self, provider_name: &str, protocol: VpnProtocol) -> bool {
        self.local
            .read()
            .map(|local| local.contains_key(&(provider_name.to_string(), protocol)))
            .unwrap_or(false)
    }

    async fn fetch(&self, provider_name: &str, protocol: VpnProtocol) -> Result<(), CatalogError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        debug!("Fetching {} infrastructure for {}", protocol, provider_name);

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        if self.fails_fetch.load(Ordering::SeqCst) {
            warn!("Fetch of {} infrastructure failed", provider_name);
            return Err(CatalogError::FetchFailed(format!(
                "{provider_name} infrastructure unreachable"
            )));
        }
        if !self.remote.contains_key(provider_name) {
            return Err(CatalogError::ProviderNotFound(provider_name.to_string()));
        }
        if !self.install(provider_name, protocol) {
            return Err(CatalogError::UnsupportedProtocol {
                provider: provider_name.to_string(),
                protocol,
            });
        }

        info!("Fetched {} infrastructure for {}", protocol, provider_name);
        Ok(())
    }

    fn server(&self, server_id: &str) -> Option<ProviderServer> {
        let local = self.local.read().ok()?;
        let mut matches: Vec<&ProviderServer> = local
            .values()
            .flat_map(|infra| infra.servers.iter())
            .filter(|server| server.id == server_id)
            .collect();

        // same server fetched for several protocols, keep preset order stable
        matches.sort_by_key(|server| server.presets.first().map(|p| p.template.protocol()));
        let (first, rest) = matches.split_first()?;
        let mut server = (*first).clone();
        for other in rest {
            server.presets.extend(other.presets.iter().cloned());
        }
        let order = server.preset_ids.clone();
        server.presets.sort_by_key(|preset| {
            order
                .iter()
                .position(|id| id == &preset.id)
                .unwrap_or(usize::MAX)
        });
        Some(server)
    }

    fn metadata(&self, provider_name: &str) -> Option<ProviderMetadata> {
        self.remote.get(provider_name).map(|infra| infra.metadata.clone())
    }
}

/// Catalog errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Provider {provider} does not support {protocol}")]
    UnsupportedProtocol {
        provider: String,
        protocol: VpnProtocol,
    },

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}
