//! Daemon configuration: a JSON file deserialized into typed structs.
//!
//! Each resolver section carries only the fields it wants to change; the rest
//! come from the resolver's defaults via an explicit `apply_to` merge.

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::Path;

use discovery_core::address::{AddressResolver, AddressSourceError};
use discovery_core::derive::DeriveSettings;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const BUILTIN_RESOLVER: &str = "builtin";
pub const CONSUL_RESOLVER: &str = "consul";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no masters configured")]
    NoMasters,
    #[error("invalid master {0:?}: expected host:port")]
    Master(String),
    #[error("duplicate master {0}")]
    DuplicateMaster(String),
    #[error("invalid address sources: {0}")]
    AddressSources(#[from] AddressSourceError),
    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),
    #[error("catalog address {0:?} must be host:port")]
    CatalogAddress(String),
    #[error("unsupported catalog scheme {0:?}")]
    Scheme(String),
    #[error("unknown resolver {0:?}")]
    UnknownResolver(String),
    #[error("invalid options for resolver {name}: {source}")]
    ResolverOptions {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no resolvers configured")]
    NoResolvers,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Masters as `host:port`, tried in order.
    #[serde(default)]
    pub masters: Vec<String>,
    /// Snapshot location; `{leader}` is replaced with a master's `host:port`.
    #[serde(default = "default_state_url_template")]
    pub state_url_template: String,
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
    #[serde(default = "default_state_timeout_seconds")]
    pub state_timeout_seconds: u64,
    /// How long the daemon may run without a leader; 0 waits forever.
    #[serde(default = "default_leader_timeout_seconds")]
    pub leader_timeout_seconds: u64,
    #[serde(default = "default_address_sources")]
    pub address_sources: Vec<String>,
    /// Resolver name to its overrides; `null` selects the defaults.
    #[serde(default = "default_resolvers")]
    pub resolvers: BTreeMap<String, Value>,
}

fn default_state_url_template() -> String {
    "http://{leader}/snapshot.json".into()
}

fn default_refresh_seconds() -> u64 {
    60
}

fn default_state_timeout_seconds() -> u64 {
    300
}

fn default_leader_timeout_seconds() -> u64 {
    30
}

fn default_address_sources() -> Vec<String> {
    ["netinfo", "mesos", "host"].into_iter().map(String::from).collect()
}

fn default_resolvers() -> BTreeMap<String, Value> {
    BTreeMap::from([(BUILTIN_RESOLVER.to_string(), Value::Null)])
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            masters: Vec::new(),
            state_url_template: default_state_url_template(),
            refresh_seconds: default_refresh_seconds(),
            state_timeout_seconds: default_state_timeout_seconds(),
            leader_timeout_seconds: default_leader_timeout_seconds(),
            address_sources: default_address_sources(),
            resolvers: default_resolvers(),
        }
    }
}

/// A configured backend with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverConfig {
    Builtin(BuiltinConfig),
    Catalog(CatalogConfig),
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse { path: display, source })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Rejects anything that would make the daemon misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.masters.is_empty() {
            return Err(ConfigError::NoMasters);
        }
        let mut seen = HashSet::new();
        for master in &self.masters {
            let Some(normalized) = normalize_host_port(master) else {
                return Err(ConfigError::Master(master.clone()));
            };
            if !seen.insert(normalized) {
                return Err(ConfigError::DuplicateMaster(master.clone()));
            }
        }
        if self.refresh_seconds == 0 {
            return Err(ConfigError::NotPositive("refresh_seconds"));
        }
        if self.state_timeout_seconds == 0 {
            return Err(ConfigError::NotPositive("state_timeout_seconds"));
        }
        self.address_resolver()?;

        for resolver in self.resolvers()? {
            if let ResolverConfig::Catalog(catalog) = resolver {
                catalog.validate()?;
            }
        }
        Ok(())
    }

    pub fn address_resolver(&self) -> Result<AddressResolver, ConfigError> {
        Ok(AddressResolver::parse(&self.address_sources)?)
    }

    /// Resolver sections merged onto their defaults, in name order.
    pub fn resolvers(&self) -> Result<Vec<ResolverConfig>, ConfigError> {
        if self.resolvers.is_empty() {
            return Err(ConfigError::NoResolvers);
        }
        self.resolvers
            .iter()
            .map(|(name, options)| match name.as_str() {
                BUILTIN_RESOLVER => {
                    let mut cfg = BuiltinConfig::default();
                    overrides::<BuiltinOverrides>(name, options)?.apply_to(&mut cfg);
                    Ok(ResolverConfig::Builtin(cfg))
                }
                CONSUL_RESOLVER => {
                    let mut cfg = CatalogConfig::default();
                    overrides::<CatalogOverrides>(name, options)?.apply_to(&mut cfg);
                    Ok(ResolverConfig::Catalog(cfg))
                }
                other => Err(ConfigError::UnknownResolver(other.to_string())),
            })
            .collect()
    }
}

fn overrides<T>(name: &str, options: &Value) -> Result<T, ConfigError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if options.is_null() {
        return Ok(T::default());
    }
    T::deserialize(options).map_err(|source| ConfigError::ResolverOptions {
        name: name.to_string(),
        source,
    })
}

/// `host:port`, IPv6 hosts in brackets. IP hosts come back in canonical
/// form so different spellings of one address compare equal.
fn normalize_host_port(s: &str) -> Option<String> {
    let (host, port) = match s.strip_prefix('[') {
        Some(rest) => {
            let (host, port) = rest.split_once("]:")?;
            host.parse::<Ipv6Addr>().ok()?;
            (host, port)
        }
        None => {
            let (host, port) = s.rsplit_once(':')?;
            if host.is_empty() || host.contains(':') {
                return None;
            }
            (host, port)
        }
    };
    let port: u16 = port.parse().ok()?;
    Some(match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{host}:{port}"),
    })
}

fn is_host_port(s: &str) -> bool {
    normalize_host_port(s).is_some()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinConfig {
    pub domain: String,
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self { domain: "mesos".into() }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuiltinOverrides {
    pub domain: Option<String>,
}

impl BuiltinOverrides {
    pub fn apply_to(self, cfg: &mut BuiltinConfig) {
        if let Some(domain) = self.domain {
            cfg.domain = domain.to_ascii_lowercase();
        }
    }
}

/// Settings of the service-catalog backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Catalog server `host:port`. Node agents are assumed to listen on the same port.
    pub address: String,
    pub scheme: String,
    pub datacenter: Option<String>,
    pub token: Option<String>,
    /// Trust the local generation state and never list agents for drift.
    pub cache_only: bool,
    /// Drift listing runs every this many cycles.
    pub cache_refresh: u32,
    pub service_prefix: String,
    pub node_service_name: String,
    /// Nodes reconciled at once; 0 is unbounded.
    pub max_concurrent_nodes: usize,
    pub request_timeout_seconds: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".into(),
            scheme: "http".into(),
            datacenter: None,
            token: None,
            cache_only: false,
            cache_refresh: 3,
            service_prefix: "mesos-dns".into(),
            node_service_name: "mesos".into(),
            max_concurrent_nodes: 0,
            request_timeout_seconds: 5,
        }
    }
}

impl CatalogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_host_port(&self.address) {
            return Err(ConfigError::CatalogAddress(self.address.clone()));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Scheme(self.scheme.clone()));
        }
        if self.cache_refresh == 0 {
            return Err(ConfigError::NotPositive("cache_refresh"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::NotPositive("request_timeout_seconds"));
        }
        Ok(())
    }

    /// Port every node agent is contacted on.
    pub fn agent_port(&self) -> Option<u16> {
        self.address.rsplit_once(':')?.1.parse().ok()
    }

    pub fn derive_settings(&self) -> DeriveSettings {
        DeriveSettings {
            prefix: self.service_prefix.clone(),
            node_service_name: self.node_service_name.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogOverrides {
    pub address: Option<String>,
    pub scheme: Option<String>,
    pub datacenter: Option<String>,
    pub token: Option<String>,
    pub cache_only: Option<bool>,
    pub cache_refresh: Option<u32>,
    pub service_prefix: Option<String>,
    pub node_service_name: Option<String>,
    pub max_concurrent_nodes: Option<usize>,
    pub request_timeout_seconds: Option<u64>,
}

impl CatalogOverrides {
    pub fn apply_to(self, cfg: &mut CatalogConfig) {
        if let Some(v) = self.address {
            cfg.address = v;
        }
        if let Some(v) = self.scheme {
            cfg.scheme = v;
        }
        if let Some(v) = self.datacenter {
            cfg.datacenter = Some(v);
        }
        if let Some(v) = self.token {
            cfg.token = Some(v);
        }
        if let Some(v) = self.cache_only {
            cfg.cache_only = v;
        }
        if let Some(v) = self.cache_refresh {
            cfg.cache_refresh = v;
        }
        if let Some(v) = self.service_prefix {
            cfg.service_prefix = v;
        }
        if let Some(v) = self.node_service_name {
            cfg.node_service_name = v;
        }
        if let Some(v) = self.max_concurrent_nodes {
            cfg.max_concurrent_nodes = v;
        }
        if let Some(v) = self.request_timeout_seconds {
            cfg.request_timeout_seconds = v;
        }
    }
}
