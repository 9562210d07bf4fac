//! Profile Model
//!
//! A profile is either a *host* profile, carrying its own protocol
//! settings and endpoints, or a *provider* profile, which selects a
//! server from the provider catalog and only overlays user data
//! (account, keys, custom endpoint) on top of the provider preset.
//!
//! Exactly one VPN protocol is configured per profile; this is encoded
//! by [`ProtocolSettings`] rather than by optional per-protocol fields.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::SystemTime;
use uuid::Uuid;

/// Supported VPN protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnProtocol {
    OpenVpn,
    WireGuard,
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnProtocol::OpenVpn => write!(f, "OpenVPN"),
            VpnProtocol::WireGuard => write!(f, "WireGuard"),
        }
    }
}

/// Transport used to reach an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    #[default]
    Udp,
    Tcp,
}

/// Network endpoint (host + port)
///
/// Parsed from `host:port`, optionally suffixed with `/tcp` or `/udp`.
/// UDP is implied and omitted when formatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    /// Hostname or IP address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Transport
    pub socket: SocketType,
}

impl Endpoint {
    /// Create a UDP endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: SocketType::Udp,
        }
    }

    /// Same endpoint over a different transport
    pub fn with_socket(mut self, socket: SocketType) -> Self {
        self.socket = socket;
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)?;
        } else {
            write!(f, "{}:{}", self.host, self.port)?;
        }
        if self.socket == SocketType::Tcp {
            write!(f, "/tcp")?;
        }
        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, socket) = match s.rsplit_once('/') {
            Some((address, "tcp")) => (address, SocketType::Tcp),
            Some((address, "udp")) => (address, SocketType::Udp),
            Some(_) => return Err(EndpointError::InvalidSocket(s.to_string())),
            None => (s, SocketType::Udp),
        };
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointError::MissingHost(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| EndpointError::InvalidPort(s.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
            socket,
        })
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Endpoint parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("Missing port in endpoint '{0}'")]
    MissingPort(String),

    #[error("Missing host in endpoint '{0}'")]
    MissingHost(String),

    #[error("Invalid port in endpoint '{0}'")]
    InvalidPort(String),

    #[error("Invalid socket type in endpoint '{0}'")]
    InvalidSocket(String),
}

/// Profile header, the part shown in profile lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileHeader {
    /// Display name, kept unique across the store
    pub name: String,
    /// Last modification time
    pub last_update: SystemTime,
    /// Provider name, `None` for host profiles
    #[serde(default)]
    pub provider_name: Option<String>,
    /// Content fingerprint of imported settings
    #[serde(default)]
    pub fingerprint: String,
}

impl ProfileHeader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_update: SystemTime::now(),
            provider_name: None,
            fingerprint: String::new(),
        }
    }
}

/// Account credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub username: String,
    /// Plaintext password, moved to the secret vault before connecting
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
    }
}

/// OpenVPN settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenVpnSettings {
    /// Remote endpoints, tried in order
    #[serde(default)]
    pub remotes: Vec<Endpoint>,
    /// Data channel cipher
    #[serde(default = "default_cipher")]
    pub cipher: String,
    /// HMAC digest (legacy CBC ciphers only)
    #[serde(default)]
    pub digest: Option<String>,
    /// CA certificate (PEM)
    #[serde(default)]
    pub ca: Option<String>,
    /// Whether the server expects `auth-user-pass`
    #[serde(default)]
    pub auth_user_pass: bool,
}

fn default_cipher() -> String {
    "AES-256-GCM".to_string()
}

impl Default for OpenVpnSettings {
    fn default() -> Self {
        Self {
            remotes: Vec::new(),
            cipher: default_cipher(),
            digest: None,
            ca: None,
            auth_user_pass: false,
        }
    }
}

/// WireGuard peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGuardPeer {
    /// Peer public key (base64)
    pub public_key: String,
    /// Peer endpoint
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    /// Allowed IPs (CIDR notation)
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,
    /// Persistent keepalive interval (seconds)
    #[serde(default)]
    pub keepalive: Option<u16>,
    /// Preshared key (base64)
    #[serde(default)]
    pub preshared_key: Option<String>,
}

fn default_allowed_ips() -> Vec<String> {
    vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
}

/// WireGuard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGuardSettings {
    /// Interface private key (base64)
    pub private_key: String,
    /// Interface addresses (CIDR notation)
    #[serde(default)]
    pub addresses: Vec<String>,
    /// DNS servers pushed inside the tunnel
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    /// Peers, empty for provider profiles
    #[serde(default)]
    pub peers: Vec<WireGuardPeer>,
}

/// Protocol-specific settings, one protocol per profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolSettings {
    OpenVpn(OpenVpnSettings),
    WireGuard(WireGuardSettings),
}

impl ProtocolSettings {
    pub fn protocol(&self) -> VpnProtocol {
        match self {
            ProtocolSettings::OpenVpn(_) => VpnProtocol::OpenVpn,
            ProtocolSettings::WireGuard(_) => VpnProtocol::WireGuard,
        }
    }
}

/// Server selection of a provider profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSelection {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub preset_id: Option<String>,
    #[serde(default)]
    pub custom_endpoint: Option<Endpoint>,
}

/// Trusted networks driving on-demand activation
///
/// When enabled, the tunnel connects on demand everywhere except on the
/// trusted networks listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnDemand {
    #[serde(default)]
    pub is_enabled: bool,
    /// Cellular networks are trusted
    #[serde(default)]
    pub trusts_mobile: bool,
    /// Wired networks are trusted
    #[serde(default)]
    pub trusts_ethernet: bool,
    /// Trusted Wi-Fi SSIDs
    #[serde(default)]
    pub trusted_ssids: BTreeSet<String>,
}

/// Manual default-gateway override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOverride {
    pub default_ipv4: bool,
    pub default_ipv6: bool,
}

/// DNS resolution mode inside the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DnsMode {
    Plain,
    Https { url: String },
    Tls { server_name: String },
    Disabled,
}

/// Manual DNS override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsOverride {
    pub mode: DnsMode,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub search_domains: Vec<String>,
}

/// Manual proxy override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProxyOverride {
    Manual {
        server: Endpoint,
        #[serde(default)]
        bypass_domains: Vec<String>,
    },
    Pac {
        url: String,
    },
    Disabled,
}

/// Network settings, `None` meaning "as pushed by the server"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub gateway: Option<GatewayOverride>,
    #[serde(default)]
    pub dns: Option<DnsOverride>,
    #[serde(default)]
    pub proxy: Option<ProxyOverride>,
    #[serde(default)]
    pub mtu: Option<u16>,
    #[serde(default)]
    pub keeps_alive_on_sleep: bool,
    #[serde(default = "default_true")]
    pub resolves_hostname: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            gateway: None,
            dns: None,
            proxy: None,
            mtu: None,
            keeps_alive_on_sleep: false,
            resolves_hostname: true,
        }
    }
}

/// A VPN profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub header: ProfileHeader,
    #[serde(default)]
    pub account: Account,
    pub settings: ProtocolSettings,
    /// Provider server selection, meaningful only with a provider name
    #[serde(default)]
    pub provider: Option<ProviderSelection>,
    /// Endpoint overriding the host settings' remotes
    #[serde(default)]
    pub host_custom_endpoint: Option<Endpoint>,
    #[serde(default)]
    pub on_demand: OnDemand,
    #[serde(default)]
    pub network: NetworkSettings,
    /// Sentinel standing for "no profile"
    #[serde(skip)]
    pub is_placeholder: bool,
}

impl Profile {
    /// Create a host profile
    pub fn host(name: impl Into<String>, settings: ProtocolSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            header: ProfileHeader::new(name),
            account: Account::default(),
            settings,
            provider: None,
            host_custom_endpoint: None,
            on_demand: OnDemand::default(),
            network: NetworkSettings::default(),
            is_placeholder: false,
        }
    }

    /// Create a provider profile bound to a server
    pub fn provider(
        name: impl Into<String>,
        provider_name: impl Into<String>,
        settings: ProtocolSettings,
        server_id: impl Into<String>,
    ) -> Self {
        let mut profile = Self::host(name, settings);
        profile.header.provider_name = Some(provider_name.into());
        profile.provider = Some(ProviderSelection {
            server_id: Some(server_id.into()),
            ..ProviderSelection::default()
        });
        profile
    }

    /// The "no profile" sentinel
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::nil(),
            header: ProfileHeader {
                name: String::new(),
                last_update: SystemTime::UNIX_EPOCH,
                provider_name: None,
                fingerprint: String::new(),
            },
            account: Account::default(),
            settings: ProtocolSettings::OpenVpn(OpenVpnSettings::default()),
            provider: None,
            host_custom_endpoint: None,
            on_demand: OnDemand::default(),
            network: NetworkSettings::default(),
            is_placeholder: true,
        }
    }

    pub fn protocol(&self) -> VpnProtocol {
        self.settings.protocol()
    }

    pub fn is_provider(&self) -> bool {
        self.header.provider_name.is_some()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.header.provider_name.as_deref()
    }

    pub fn provider_server_id(&self) -> Option<&str> {
        self.provider.as_ref()?.server_id.as_deref()
    }

    pub fn provider_preset_id(&self) -> Option<&str> {
        self.provider.as_ref()?.preset_id.as_deref()
    }

    pub fn provider_custom_endpoint(&self) -> Option<&Endpoint> {
        self.provider.as_ref()?.custom_endpoint.as_ref()
    }

    /// Select a provider server
    ///
    /// Clears the custom endpoint. When the server actually changes, the
    /// preset falls back to the server's first preset.
    pub fn set_provider_server(&mut self, server_id: &str, first_preset_id: Option<&str>) {
        let selection = self.provider.get_or_insert_with(ProviderSelection::default);
        let changed = selection.server_id.as_deref() != Some(server_id);
        selection.server_id = Some(server_id.to_string());
        selection.custom_endpoint = None;
        if changed {
            selection.preset_id = first_preset_id.map(str::to_string);
        }
    }

    pub fn set_provider_custom_endpoint(&mut self, endpoint: Option<Endpoint>) {
        self.provider
            .get_or_insert_with(ProviderSelection::default)
            .custom_endpoint = endpoint;
    }

    /// Clone with a fresh identifier
    pub fn with_new_id(&self) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4();
        copy
    }

    /// Clone under a name that is unique among `existing`
    pub fn renamed_uniquely(&self, existing: &HashSet<String>) -> Self {
        let mut copy = self.clone();
        copy.header.name = unique_name(&self.header.name, existing);
        copy.header.last_update = SystemTime::now();
        copy
    }

    /// Short description for logs
    pub fn log_description(&self) -> String {
        format!("'{}' ({})", self.header.name, self.id)
    }
}

/// First of `name`, `name (1)`, `name (2)`, ... not contained in `existing`
pub fn unique_name(name: &str, existing: &HashSet<String>) -> String {
    if !existing.contains(name) {
        return name.to_string();
    }
    (1..)
        .map(|n| format!("{name} ({n})"))
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openvpn_host() -> Profile {
        Profile::host(
            "Home",
            ProtocolSettings::OpenVpn(OpenVpnSettings {
                remotes: vec![Endpoint::new("1.2.3.4", 1194)],
                ..OpenVpnSettings::default()
            }),
        )
    }

    #[test]
    fn test_endpoint_parse() {
        let ep: Endpoint = "5.6.7.8:1194".parse().unwrap();
        assert_eq!(ep, Endpoint::new("5.6.7.8", 1194));
        assert_eq!(ep.to_string(), "5.6.7.8:1194");

        let tcp: Endpoint = "vpn.example.com:443/tcp".parse().unwrap();
        assert_eq!(tcp.socket, SocketType::Tcp);
        assert_eq!(tcp.to_string(), "vpn.example.com:443/tcp");
    }

    #[test]
    fn test_endpoint_parse_ipv6() {
        let ep: Endpoint = "[2001:db8::1]:51820".parse().unwrap();
        assert_eq!(ep.host, "2001:db8::1");
        assert_eq!(ep.to_string(), "[2001:db8::1]:51820");
    }

    #[test]
    fn test_endpoint_parse_errors() {
        assert!(matches!(
            "1.2.3.4".parse::<Endpoint>(),
            Err(EndpointError::MissingPort(_))
        ));
        assert!(matches!(
            "1.2.3.4:99999".parse::<Endpoint>(),
            Err(EndpointError::InvalidPort(_))
        ));
        assert!(matches!(
            "1.2.3.4:1194/sctp".parse::<Endpoint>(),
            Err(EndpointError::InvalidSocket(_))
        ));
    }

    #[test]
    fn test_protocol_is_derived_from_settings() {
        let profile = openvpn_host();
        assert_eq!(profile.protocol(), VpnProtocol::OpenVpn);
        assert!(!profile.is_provider());
    }

    #[test]
    fn test_set_provider_server_resets_endpoint_and_preset() {
        let mut profile = Profile::provider(
            "Acme",
            "acme",
            ProtocolSettings::OpenVpn(OpenVpnSettings::default()),
            "nyc1",
        );
        profile.provider.as_mut().unwrap().preset_id = Some("udp".into());
        profile.set_provider_custom_endpoint(Some(Endpoint::new("9.9.9.9", 443)));

        profile.set_provider_server("nyc1", Some("tcp"));
        assert_eq!(profile.provider_preset_id(), Some("udp"));
        assert!(profile.provider_custom_endpoint().is_none());

        profile.set_provider_server("ams1", Some("tcp"));
        assert_eq!(profile.provider_server_id(), Some("ams1"));
        assert_eq!(profile.provider_preset_id(), Some("tcp"));
    }

    #[test]
    fn test_unique_name() {
        let existing: HashSet<String> = ["Work", "Work (1)"].iter().map(|s| s.to_string()).collect();

        assert_eq!(unique_name("Home", &existing), "Home");
        assert_eq!(unique_name("Work", &existing), "Work (2)");
    }

    #[test]
    fn test_with_new_id_keeps_content() {
        let profile = openvpn_host();
        let copy = profile.with_new_id();

        assert_ne!(copy.id, profile.id);
        assert_eq!(copy.settings, profile.settings);
    }

    #[test]
    fn test_profile_serialization_drops_password() {
        let mut profile = openvpn_host();
        profile.account = Account::new("user", "secret");

        let json = serde_json::to_string(&profile).unwrap();
        let parsed: Profile = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.account.username, "user");
        assert!(parsed.account.password.is_empty());
        assert_eq!(parsed.settings, profile.settings);
    }

    #[test]
    fn test_placeholder() {
        let placeholder = Profile::placeholder();
        assert!(placeholder.is_placeholder);
        assert!(placeholder.id.is_nil());
    }
}
