//! Gateway configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/actingweb/gateway.toml`.
//!
//! # Required fields
//! - `actor.id`
//! - `actor.proto_fqdn`

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub actor: ActorConfig,
    pub http: HttpConfig,
    pub fanout: FanOutSection,
    pub subscriptions: SubscriptionsSection,
    pub capabilities: CapabilitiesSection,
    pub proxy: ProxySection,
}

#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub id: String,
    /// `"<scheme>://<host>"`, used to build downgraded/resync resource URLs.
    pub proto_fqdn: String,
    /// Comma-separated option tags this actor advertises via
    /// `/meta/actingweb/supported`.
    pub supported: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct FanOutSection {
    pub max_concurrent: usize,
    pub max_payload_for_high_granularity: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,
    pub request_timeout_seconds: u64,
    pub enable_compression: bool,
    pub persist_circuit_breakers: bool,
}

#[derive(Debug, Clone)]
pub struct SubscriptionsSection {
    pub sync_subscription_callbacks: bool,
    pub pending_queue_bound: usize,
}

#[derive(Debug, Clone)]
pub struct CapabilitiesSection {
    /// `aw_capabilities::PeerCapabilities` currently hard-codes its TTL
    /// rather than taking it as a parameter, so this field is carried
    /// through config for documentation/forward-compat but has no effect
    /// yet.
    pub capabilities_ttl_hours: i64,
}

#[derive(Debug, Clone)]
pub struct ProxySection {
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    actor: Option<RawActorConfig>,
    http: Option<RawHttpConfig>,
    fanout: Option<RawFanOutSection>,
    subscriptions: Option<RawSubscriptionsSection>,
    capabilities: Option<RawCapabilitiesSection>,
    proxy: Option<RawProxySection>,
}

#[derive(Debug, Deserialize)]
struct RawActorConfig {
    id: Option<String>,
    proto_fqdn: Option<String>,
    supported: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHttpConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFanOutSection {
    max_concurrent: Option<usize>,
    max_payload_for_high_granularity: Option<usize>,
    circuit_breaker_threshold: Option<u32>,
    circuit_breaker_cooldown_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
    enable_compression: Option<bool>,
    persist_circuit_breakers: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawSubscriptionsSection {
    sync_subscription_callbacks: Option<bool>,
    pending_queue_bound: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawCapabilitiesSection {
    capabilities_ttl_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawProxySection {
    connect_timeout_seconds: Option<u64>,
    read_timeout_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load gateway config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load gateway config from the default path `/etc/actingweb/gateway.toml`.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/actingweb/gateway.toml"))
}

/// Load gateway config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let raw_actor = raw.actor.ok_or_else(|| ConfigError::MissingField("actor".to_owned()))?;
    let id = raw_actor.id.ok_or_else(|| ConfigError::MissingField("actor.id".to_owned()))?;
    let proto_fqdn = raw_actor
        .proto_fqdn
        .ok_or_else(|| ConfigError::MissingField("actor.proto_fqdn".to_owned()))?;
    let actor = ActorConfig {
        id,
        proto_fqdn,
        supported: raw_actor.supported.unwrap_or_default(),
        version: raw_actor.version.unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned()),
    };

    let http = match raw.http {
        Some(h) => HttpConfig {
            bind: h.bind.unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
        },
        None => HttpConfig {
            bind: "0.0.0.0:8080".to_owned(),
        },
    };

    let fanout = match raw.fanout {
        Some(f) => FanOutSection {
            max_concurrent: f.max_concurrent.unwrap_or(10),
            max_payload_for_high_granularity: f.max_payload_for_high_granularity.unwrap_or(65536),
            circuit_breaker_threshold: f.circuit_breaker_threshold.unwrap_or(5),
            circuit_breaker_cooldown_seconds: f.circuit_breaker_cooldown_seconds.unwrap_or(60),
            request_timeout_seconds: f.request_timeout_seconds.unwrap_or(30),
            enable_compression: f.enable_compression.unwrap_or(true),
            persist_circuit_breakers: f.persist_circuit_breakers.unwrap_or(true),
        },
        None => FanOutSection {
            max_concurrent: 10,
            max_payload_for_high_granularity: 65536,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_seconds: 60,
            request_timeout_seconds: 30,
            enable_compression: true,
            persist_circuit_breakers: true,
        },
    };

    let subscriptions = match raw.subscriptions {
        Some(s) => SubscriptionsSection {
            sync_subscription_callbacks: s.sync_subscription_callbacks.unwrap_or(true),
            pending_queue_bound: s.pending_queue_bound.unwrap_or(100),
        },
        None => SubscriptionsSection {
            sync_subscription_callbacks: true,
            pending_queue_bound: 100,
        },
    };

    let capabilities = match raw.capabilities {
        Some(c) => CapabilitiesSection {
            capabilities_ttl_hours: c.capabilities_ttl_hours.unwrap_or(24),
        },
        None => CapabilitiesSection { capabilities_ttl_hours: 24 },
    };

    let proxy = match raw.proxy {
        Some(p) => ProxySection {
            connect_timeout_seconds: p.connect_timeout_seconds.unwrap_or(5),
            read_timeout_seconds: p.read_timeout_seconds.unwrap_or(20),
        },
        None => ProxySection {
            connect_timeout_seconds: 5,
            read_timeout_seconds: 20,
        },
    };

    Ok(GatewayConfig {
        actor,
        http,
        fanout,
        subscriptions,
        capabilities,
        proxy,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "Parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
