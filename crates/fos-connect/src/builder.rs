//! Tunnel Configuration Builder
//!
//! Turns a profile into the declarative configuration consumed by the
//! tunnel. Provider profiles are merged with their server and preset
//! from the catalog; host profiles carry their own settings. The account
//! password is written to the vault first so that the configuration only
//! holds a reference to it.
//!
//! A configuration is built fresh for every connect or reinstall and is
//! never modified afterwards.

use crate::config::{OrchestratorConfig, TunnelIds};
use crate::keys::{PrivateKey, PublicKey};
use crate::preferences::PreferenceValues;
use crate::profile::{
    DnsMode, DnsOverride, Endpoint, GatewayOverride, Profile, ProtocolSettings, ProxyOverride,
    VpnProtocol, WireGuardPeer,
};
use crate::provider::{PresetTemplate, ProviderCatalog, ProviderPreset, ProviderServer};
use crate::vault::{SecretKey, SecretRef, SecretVault, VaultError};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, warn};
use uuid::Uuid;

/// Routing policy of the OpenVPN default gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoutingPolicy {
    Ipv4,
    Ipv6,
}

/// Server-pushed settings ignored in favour of manual ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PullMask {
    Routes,
    Dns,
    Proxy,
}

/// OpenVPN tunnel settings
#[derive(Debug, Clone, PartialEq)]
pub struct OpenVpnTunnel {
    pub remotes: Vec<Endpoint>,
    pub cipher: String,
    pub digest: Option<String>,
    pub ca: Option<String>,
    /// Always 0, the tunnel library picks its own floor
    pub tls_security_level: u8,
    pub routing_policies: BTreeSet<RoutingPolicy>,
    pub dns: Option<DnsOverride>,
    pub proxy: Option<ProxyOverride>,
    pub mtu: Option<u16>,
    pub no_pull_mask: BTreeSet<PullMask>,
}

/// WireGuard tunnel settings
#[derive(Debug, Clone, PartialEq)]
pub struct WireGuardTunnel {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
    pub addresses: Vec<String>,
    pub dns: Vec<IpAddr>,
    pub peers: Vec<WireGuardPeer>,
    pub mtu: Option<u16>,
}

/// Protocol-specific part of a configuration
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelSettings {
    OpenVpn(OpenVpnTunnel),
    WireGuard(WireGuardTunnel),
}

/// Network condition of an on-demand rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceMatch {
    Any,
    Cellular,
    Ethernet,
    WiFi { ssids: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDemandAction {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnDemandRule {
    pub action: OnDemandAction,
    pub interface: InterfaceMatch,
}

/// Platform-ready tunnel configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfiguration {
    /// Identifier of the tunnel installation, per protocol
    pub tunnel_id: String,
    pub profile_id: Uuid,
    pub title: String,
    pub app_group: String,
    pub settings: TunnelSettings,
    pub username: Option<String>,
    pub password_reference: Option<SecretRef>,
    pub on_demand_rules: Vec<OnDemandRule>,
    pub disconnects_on_sleep: bool,
    pub kill_switch: bool,
    pub masks_private_data: bool,
    pub debug_log_format: Option<String>,
}

impl TunnelConfiguration {
    pub fn protocol(&self) -> VpnProtocol {
        match self.settings {
            TunnelSettings::OpenVpn(_) => VpnProtocol::OpenVpn,
            TunnelSettings::WireGuard(_) => VpnProtocol::WireGuard,
        }
    }

    /// First endpoint the tunnel will try
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match &self.settings {
            TunnelSettings::OpenVpn(ovpn) => ovpn.remotes.first(),
            TunnelSettings::WireGuard(wg) => wg.peers.iter().find_map(|p| p.endpoint.as_ref()),
        }
    }
}

/// Optional capabilities of the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub network_settings: bool,
    pub on_demand: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            network_settings: true,
            on_demand: true,
        }
    }
}

/// Builds tunnel configurations from profiles
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    app_group: String,
    tunnel_ids: TunnelIds,
    flags: FeatureFlags,
    masks_private_data: bool,
    debug_log_format: Option<String>,
}

impl ConfigurationBuilder {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            app_group: config.app_group.clone(),
            tunnel_ids: config.tunnel_ids.clone(),
            flags: FeatureFlags {
                network_settings: config.network_settings_supported,
                on_demand: config.on_demand_supported,
            },
            masks_private_data: true,
            debug_log_format: None,
        }
    }

    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Take logging preferences into account for the next builds
    pub fn apply_preferences(&mut self, values: &PreferenceValues) {
        self.masks_private_data = values.masks_private_data;
        self.debug_log_format = values.tunnel_log_format.clone();
    }

    pub fn build(
        &self,
        profile: &Profile,
        catalog: &dyn ProviderCatalog,
        vault: &dyn SecretVault,
    ) -> Result<TunnelConfiguration, ConfigError> {
        if profile.is_placeholder {
            return Err(ConfigError::BuildFailed("placeholder profile".into()));
        }

        let settings = match profile.provider_name() {
            Some(provider_name) => self.provider_settings(profile, provider_name, catalog)?,
            None => self.host_settings(profile)?,
        };
        let settings = self.apply_network_settings(profile, settings);

        let (username, password_reference) = self.credentials(profile, catalog, vault)?;
        let on_demand_rules = self.on_demand_rules(profile);

        let configuration = TunnelConfiguration {
            tunnel_id: self.tunnel_ids.for_protocol(profile.protocol()).to_string(),
            profile_id: profile.id,
            title: profile.header.name.clone(),
            app_group: self.app_group.clone(),
            settings,
            username,
            password_reference,
            on_demand_rules,
            disconnects_on_sleep: !profile.network.keeps_alive_on_sleep,
            kill_switch: true,
            masks_private_data: self.masks_private_data,
            debug_log_format: self.debug_log_format.clone(),
        };

        debug!(
            "Built {} configuration for {} (endpoint {:?})",
            configuration.protocol(),
            profile.log_description(),
            configuration.endpoint().map(ToString::to_string)
        );
        Ok(configuration)
    }

    fn host_settings(&self, profile: &Profile) -> Result<TunnelSettings, ConfigError> {
        match &profile.settings {
            ProtocolSettings::OpenVpn(ovpn) => {
                let remotes = match &profile.host_custom_endpoint {
                    Some(endpoint) => vec![endpoint.clone()],
                    None => ovpn.remotes.clone(),
                };
                if remotes.is_empty() {
                    return Err(ConfigError::BuildFailed("no OpenVPN remotes".into()));
                }
                Ok(TunnelSettings::OpenVpn(OpenVpnTunnel {
                    remotes,
                    cipher: ovpn.cipher.clone(),
                    digest: ovpn.digest.clone(),
                    ca: ovpn.ca.clone(),
                    tls_security_level: 0,
                    routing_policies: BTreeSet::new(),
                    dns: None,
                    proxy: None,
                    mtu: None,
                    no_pull_mask: BTreeSet::new(),
                }))
            }
            ProtocolSettings::WireGuard(wg) => {
                let mut peers = wg.peers.clone();
                if peers.is_empty() {
                    return Err(ConfigError::BuildFailed("no WireGuard peers".into()));
                }
                if let Some(endpoint) = &profile.host_custom_endpoint {
                    peers[0].endpoint = Some(endpoint.clone());
                }
                wireguard_tunnel(&wg.private_key, wg.addresses.clone(), wg.dns.clone(), peers)
            }
        }
    }

    fn provider_settings(
        &self,
        profile: &Profile,
        provider_name: &str,
        catalog: &dyn ProviderCatalog,
    ) -> Result<TunnelSettings, ConfigError> {
        let server_id = profile
            .provider_server_id()
            .ok_or_else(|| ConfigError::MissingProviderServer(provider_name.to_string()))?;
        let server = catalog
            .server(server_id)
            .ok_or_else(|| ConfigError::MissingProviderServer(server_id.to_string()))?;
        let preset = resolve_preset(profile, &server)?;

        let custom_endpoint = profile.provider_custom_endpoint().cloned();
        match (&preset.template, &profile.settings) {
            (PresetTemplate::OpenVpn { cipher, digest, ca, .. }, ProtocolSettings::OpenVpn(_)) => {
                let remotes = match custom_endpoint {
                    Some(endpoint) => vec![endpoint],
                    None => server.endpoints(preset),
                };
                if remotes.is_empty() {
                    return Err(ConfigError::BuildFailed(format!(
                        "server {} has no endpoints",
                        server.id
                    )));
                }
                Ok(TunnelSettings::OpenVpn(OpenVpnTunnel {
                    remotes,
                    cipher: cipher.clone(),
                    digest: digest.clone(),
                    ca: ca.clone(),
                    tls_security_level: 0,
                    routing_policies: [RoutingPolicy::Ipv4, RoutingPolicy::Ipv6].into(),
                    dns: None,
                    proxy: None,
                    mtu: None,
                    no_pull_mask: BTreeSet::new(),
                }))
            }
            (PresetTemplate::WireGuard { public_key, .. }, ProtocolSettings::WireGuard(wg)) => {
                let endpoint = custom_endpoint.or_else(|| server.endpoints(preset).into_iter().next());
                let peer = WireGuardPeer {
                    public_key: public_key.clone(),
                    endpoint,
                    allowed_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
                    keepalive: None,
                    preshared_key: None,
                };
                wireguard_tunnel(&wg.private_key, wg.addresses.clone(), wg.dns.clone(), vec![peer])
            }
            _ => Err(ConfigError::MissingProviderPreset(preset.id.clone())),
        }
    }

    fn apply_network_settings(&self, profile: &Profile, settings: TunnelSettings) -> TunnelSettings {
        if !self.flags.network_settings {
            return settings;
        }
        let network = &profile.network;

        match settings {
            TunnelSettings::OpenVpn(mut ovpn) => {
                if let Some(GatewayOverride { default_ipv4, default_ipv6 }) = &network.gateway {
                    ovpn.routing_policies.clear();
                    if *default_ipv4 {
                        ovpn.routing_policies.insert(RoutingPolicy::Ipv4);
                    }
                    if *default_ipv6 {
                        ovpn.routing_policies.insert(RoutingPolicy::Ipv6);
                    }
                    ovpn.no_pull_mask.insert(PullMask::Routes);
                }
                if let Some(dns) = &network.dns {
                    ovpn.dns = Some(dns.clone());
                    ovpn.no_pull_mask.insert(PullMask::Dns);
                }
                if let Some(proxy) = &network.proxy {
                    ovpn.proxy = Some(proxy.clone());
                    ovpn.no_pull_mask.insert(PullMask::Proxy);
                }
                ovpn.mtu = network.mtu;
                TunnelSettings::OpenVpn(ovpn)
            }
            TunnelSettings::WireGuard(mut wg) => {
                if let Some(DnsOverride { mode: DnsMode::Plain, servers, .. }) = &network.dns {
                    let parsed: Vec<IpAddr> = servers.iter().filter_map(|s| s.parse().ok()).collect();
                    if parsed.len() != servers.len() {
                        warn!("Ignoring unparseable DNS servers for {}", profile.log_description());
                    }
                    wg.dns = parsed;
                }
                wg.mtu = network.mtu;
                TunnelSettings::WireGuard(wg)
            }
        }
    }

    fn credentials(
        &self,
        profile: &Profile,
        catalog: &dyn ProviderCatalog,
        vault: &dyn SecretVault,
    ) -> Result<(Option<String>, Option<SecretRef>), ConfigError> {
        let metadata = profile.provider_name().and_then(|name| catalog.metadata(name));
        let requires_credentials = match (&profile.settings, profile.is_provider()) {
            (ProtocolSettings::WireGuard(_), _) => false,
            (_, true) => metadata.as_ref().is_some_and(|m| m.requires_credentials),
            (ProtocolSettings::OpenVpn(ovpn), false) => ovpn.auth_user_pass,
        };

        let account = &profile.account;
        if account.username.is_empty() {
            if requires_credentials {
                return Err(ConfigError::MissingAccount);
            }
            return Ok((None, None));
        }

        let password = metadata
            .and_then(|m| m.fixed_password)
            .unwrap_or_else(|| account.password.clone());

        let key = SecretKey::new(profile.id, &account.username);
        if !password.is_empty() {
            vault.set(&password, &key, &profile.header.name)?;
        }
        let reference = match vault.reference(&key) {
            Ok(reference) => Some(reference),
            Err(VaultError::NotFound(_)) if requires_credentials => {
                return Err(ConfigError::MissingAccount);
            }
            Err(VaultError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        Ok((Some(account.username.clone()), reference))
    }

    fn on_demand_rules(&self, profile: &Profile) -> Vec<OnDemandRule> {
        let on_demand = &profile.on_demand;
        if !self.flags.on_demand || !on_demand.is_enabled {
            return Vec::new();
        }

        let mut rules = Vec::new();
        if on_demand.trusts_mobile {
            rules.push(OnDemandRule {
                action: OnDemandAction::Disconnect,
                interface: InterfaceMatch::Cellular,
            });
        }
        if on_demand.trusts_ethernet {
            rules.push(OnDemandRule {
                action: OnDemandAction::Disconnect,
                interface: InterfaceMatch::Ethernet,
            });
        }
        if !on_demand.trusted_ssids.is_empty() {
            rules.push(OnDemandRule {
                action: OnDemandAction::Disconnect,
                interface: InterfaceMatch::WiFi {
                    ssids: on_demand.trusted_ssids.iter().cloned().collect(),
                },
            });
        }
        rules.push(OnDemandRule {
            action: OnDemandAction::Connect,
            interface: InterfaceMatch::Any,
        });
        rules
    }
}

fn resolve_preset<'a>(
    profile: &Profile,
    server: &'a ProviderServer,
) -> Result<&'a ProviderPreset, ConfigError> {
    let preset_id = profile
        .provider_preset_id()
        .or_else(|| server.first_preset_id_for(profile.protocol()))
        .ok_or_else(|| ConfigError::MissingProviderPreset(server.id.clone()))?;
    let preset = server
        .preset(preset_id)
        .ok_or_else(|| ConfigError::MissingProviderPreset(preset_id.to_string()))?;
    if preset.template.protocol() != profile.protocol() {
        return Err(ConfigError::MissingProviderPreset(preset_id.to_string()));
    }
    Ok(preset)
}

fn wireguard_tunnel(
    private_key: &str,
    addresses: Vec<String>,
    dns: Vec<IpAddr>,
    peers: Vec<WireGuardPeer>,
) -> Result<TunnelSettings, ConfigError> {
    let private_key = PrivateKey::from_base64(private_key)
        .map_err(|e| ConfigError::BuildFailed(format!("invalid private key: {e}")))?;
    for peer in &peers {
        PublicKey::from_base64(&peer.public_key)
            .map_err(|e| ConfigError::BuildFailed(format!("invalid peer public key: {e}")))?;
    }

    Ok(TunnelSettings::WireGuard(WireGuardTunnel {
        public_key: private_key.public_key(),
        private_key,
        addresses,
        dns,
        peers,
        mtu: None,
    }))
}

/// Configuration build errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing account")]
    MissingAccount,

    #[error("Missing provider server: {0}")]
    MissingProviderServer(String),

    #[error("Missing provider preset: {0}")]
    MissingProviderPreset(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Account, OpenVpnSettings, WireGuardSettings};
    use crate::provider::StaticProviderCatalog;
    use crate::provider::tests::{ACME_SERVER_KEY, acme_index};
    use crate::vault::MemoryVault;

    fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new(&OrchestratorConfig::default())
    }

    fn host_openvpn() -> Profile {
        Profile::host(
            "Home",
            ProtocolSettings::OpenVpn(OpenVpnSettings {
                remotes: vec![Endpoint::new("1.2.3.4", 1194)],
                ..OpenVpnSettings::default()
            }),
        )
    }

    fn acme_openvpn() -> Profile {
        let mut profile = Profile::provider(
            "Acme",
            "acme",
            ProtocolSettings::OpenVpn(OpenVpnSettings::default()),
            "nyc1",
        );
        profile.account = Account::new("alice", "hunter2");
        profile
    }

    fn acme_wireguard() -> Profile {
        Profile::provider(
            "Acme WG",
            "acme",
            ProtocolSettings::WireGuard(WireGuardSettings {
                private_key: PrivateKey::generate().to_base64(),
                addresses: vec!["10.64.0.2/32".into()],
                dns: Vec::new(),
                peers: Vec::new(),
            }),
            "nyc1",
        )
    }

    #[test]
    fn test_host_openvpn_uses_remotes() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();

        let cfg = builder().build(&host_openvpn(), &catalog, &vault).unwrap();

        assert_eq!(cfg.protocol(), VpnProtocol::OpenVpn);
        assert_eq!(cfg.tunnel_id, "com.fos.connect.openvpn");
        assert_eq!(cfg.endpoint().unwrap().to_string(), "1.2.3.4:1194");
        assert!(cfg.username.is_none());
        assert!(cfg.kill_switch);
        assert!(cfg.disconnects_on_sleep);
    }

    #[test]
    fn test_host_custom_endpoint_replaces_remotes() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();
        let mut profile = host_openvpn();
        profile.host_custom_endpoint = Some(Endpoint::new("5.6.7.8", 1194));

        let cfg = builder().build(&profile, &catalog, &vault).unwrap();

        let TunnelSettings::OpenVpn(ovpn) = &cfg.settings else {
            panic!("expected OpenVPN settings");
        };
        assert_eq!(ovpn.remotes, vec![Endpoint::new("5.6.7.8", 1194)]);
    }

    #[test]
    fn test_host_auth_user_pass_requires_account() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();
        let mut profile = host_openvpn();
        if let ProtocolSettings::OpenVpn(ovpn) = &mut profile.settings {
            ovpn.auth_user_pass = true;
        }

        let result = builder().build(&profile, &catalog, &vault);
        assert_eq!(result, Err(ConfigError::MissingAccount));
    }

    #[test]
    fn test_provider_openvpn_merges_preset() {
        let catalog = StaticProviderCatalog::with_bundled(acme_index());
        let vault = MemoryVault::new();

        let cfg = builder().build(&acme_openvpn(), &catalog, &vault).unwrap();

        let TunnelSettings::OpenVpn(ovpn) = &cfg.settings else {
            panic!("expected OpenVPN settings");
        };
        assert_eq!(ovpn.remotes.len(), 2);
        assert_eq!(ovpn.ca.as_deref(), Some("ACME CA"));
        assert_eq!(
            ovpn.routing_policies,
            BTreeSet::from([RoutingPolicy::Ipv4, RoutingPolicy::Ipv6])
        );
        assert_eq!(ovpn.tls_security_level, 0);
    }

    #[test]
    fn test_provider_password_goes_through_vault() {
        let catalog = StaticProviderCatalog::with_bundled(acme_index());
        let vault = MemoryVault::new();
        let profile = acme_openvpn();

        let cfg = builder().build(&profile, &catalog, &vault).unwrap();

        assert_eq!(cfg.username.as_deref(), Some("alice"));
        let reference = cfg.password_reference.unwrap();
        assert_eq!(vault.resolve(&reference).unwrap(), "hunter2");
    }

    #[test]
    fn test_provider_fixed_password() {
        let mut index = acme_index();
        index.providers[0].metadata.fixed_password = Some("fixed".into());
        let catalog = StaticProviderCatalog::with_bundled(index);
        let vault = MemoryVault::new();

        let cfg = builder().build(&acme_openvpn(), &catalog, &vault).unwrap();

        let reference = cfg.password_reference.unwrap();
        assert_eq!(vault.resolve(&reference).unwrap(), "fixed");
    }

    #[test]
    fn test_provider_requires_account() {
        let catalog = StaticProviderCatalog::with_bundled(acme_index());
        let vault = MemoryVault::new();
        let mut profile = acme_openvpn();
        profile.account = Account::default();

        let result = builder().build(&profile, &catalog, &vault);
        assert_eq!(result, Err(ConfigError::MissingAccount));
    }

    #[test]
    fn test_provider_custom_endpoint() {
        let catalog = StaticProviderCatalog::with_bundled(acme_index());
        let vault = MemoryVault::new();
        let mut profile = acme_openvpn();
        profile.set_provider_custom_endpoint(Some(Endpoint::new("10.1.0.1", 443)));

        let cfg = builder().build(&profile, &catalog, &vault).unwrap();
        assert_eq!(cfg.endpoint(), Some(&Endpoint::new("10.1.0.1", 443)));
    }

    #[test]
    fn test_missing_server_before_fetch() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();

        let result = builder().build(&acme_openvpn(), &catalog, &vault);
        assert_eq!(result, Err(ConfigError::MissingProviderServer("nyc1".into())));
    }

    #[test]
    fn test_missing_preset() {
        let catalog = StaticProviderCatalog::with_bundled(acme_index());
        let vault = MemoryVault::new();
        let mut profile = acme_openvpn();
        profile.provider.as_mut().unwrap().preset_id = Some("gone".into());

        let result = builder().build(&profile, &catalog, &vault);
        assert_eq!(result, Err(ConfigError::MissingProviderPreset("gone".into())));
    }

    #[test]
    fn test_provider_wireguard_peer_from_preset() {
        let catalog = StaticProviderCatalog::with_bundled(acme_index());
        let vault = MemoryVault::new();
        let profile = acme_wireguard();

        let cfg = builder().build(&profile, &catalog, &vault).unwrap();

        let TunnelSettings::WireGuard(wg) = &cfg.settings else {
            panic!("expected WireGuard settings");
        };
        assert_eq!(wg.peers[0].public_key, ACME_SERVER_KEY);
        assert_eq!(cfg.endpoint().unwrap().to_string(), "10.1.0.1:51820");
        assert_eq!(cfg.tunnel_id, "com.fos.connect.wireguard");
        assert!(cfg.username.is_none());
    }

    #[test]
    fn test_wireguard_invalid_key() {
        let catalog = StaticProviderCatalog::with_bundled(acme_index());
        let vault = MemoryVault::new();
        let mut profile = acme_wireguard();
        if let ProtocolSettings::WireGuard(wg) = &mut profile.settings {
            wg.private_key = "garbage".into();
        }

        let result = builder().build(&profile, &catalog, &vault);
        assert!(matches!(result, Err(ConfigError::BuildFailed(_))));
    }

    #[test]
    fn test_network_overrides_add_pull_masks() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();
        let mut profile = host_openvpn();
        profile.network.dns = Some(DnsOverride {
            mode: DnsMode::Plain,
            servers: vec!["9.9.9.9".into()],
            domain: None,
            search_domains: Vec::new(),
        });
        profile.network.gateway = Some(GatewayOverride {
            default_ipv4: true,
            default_ipv6: false,
        });
        profile.network.mtu = Some(1400);

        let cfg = builder().build(&profile, &catalog, &vault).unwrap();
        let TunnelSettings::OpenVpn(ovpn) = &cfg.settings else {
            panic!("expected OpenVPN settings");
        };
        assert_eq!(ovpn.no_pull_mask, BTreeSet::from([PullMask::Routes, PullMask::Dns]));
        assert_eq!(ovpn.routing_policies, BTreeSet::from([RoutingPolicy::Ipv4]));
        assert_eq!(ovpn.mtu, Some(1400));

        let unsupported = builder().with_flags(FeatureFlags {
            network_settings: false,
            on_demand: true,
        });
        let cfg = unsupported.build(&profile, &catalog, &vault).unwrap();
        let TunnelSettings::OpenVpn(ovpn) = &cfg.settings else {
            panic!("expected OpenVPN settings");
        };
        assert!(ovpn.no_pull_mask.is_empty());
        assert!(ovpn.dns.is_none());
    }

    #[test]
    fn test_on_demand_rules() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();
        let mut profile = host_openvpn();
        profile.on_demand.is_enabled = true;
        profile.on_demand.trusts_mobile = true;
        profile.on_demand.trusted_ssids.insert("HomeWiFi".into());

        let cfg = builder().build(&profile, &catalog, &vault).unwrap();

        assert_eq!(
            cfg.on_demand_rules,
            vec![
                OnDemandRule {
                    action: OnDemandAction::Disconnect,
                    interface: InterfaceMatch::Cellular,
                },
                OnDemandRule {
                    action: OnDemandAction::Disconnect,
                    interface: InterfaceMatch::WiFi {
                        ssids: vec!["HomeWiFi".into()],
                    },
                },
                OnDemandRule {
                    action: OnDemandAction::Connect,
                    interface: InterfaceMatch::Any,
                },
            ]
        );

        profile.on_demand.is_enabled = false;
        let cfg = builder().build(&profile, &catalog, &vault).unwrap();
        assert!(cfg.on_demand_rules.is_empty());
    }

    #[test]
    fn test_preferences_flow_into_configuration() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();
        let mut builder = builder();
        builder.apply_preferences(&PreferenceValues {
            active_profile_id: None,
            masks_private_data: false,
            tunnel_log_format: Some("$Date $Message".into()),
        });

        let cfg = builder.build(&host_openvpn(), &catalog, &vault).unwrap();
        assert!(!cfg.masks_private_data);
        assert_eq!(cfg.debug_log_format.as_deref(), Some("$Date $Message"));
    }

    #[test]
    fn test_placeholder_rejected() {
        let catalog = StaticProviderCatalog::new(acme_index());
        let vault = MemoryVault::new();
        let result = builder().build(&Profile::placeholder(), &catalog, &vault);
        assert!(matches!(result, Err(ConfigError::BuildFailed(_))));
    }
}
