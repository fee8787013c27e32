use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::Origin;
use crate::error::Result;
use crate::transport::ReconnectOptions;

// =============================================================================
// File config (figment-deserialized from defaults / ws-bridge.toml / env vars)
// =============================================================================
//
//   ws-bridge.toml:  [reconnect]
//                    max_retries = 5
//
//   env var:         WS_BRIDGE_RECONNECT__MAX_RETRIES=5   (double underscore = nesting)

pub const DEFAULT_CONFIG_FILE: &str = "ws-bridge.toml";

/// Top-level configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub connection: ConnectionFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

/// Where to connect (lives under `[connection]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    /// Absolute `ws(s)://` URL or a path starting with `/`.
    #[serde(default)]
    pub url: Option<String>,
    /// Base that relative URLs resolve against, e.g. `https://example.com`.
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub protocols: Vec<String>,
}

/// Reconnection tunables (lives under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_grow_factor")]
    pub grow_factor: f64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Unset retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Unset queues without limit while disconnected.
    #[serde(default)]
    pub max_enqueued_messages: Option<usize>,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            grow_factor: default_grow_factor(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_retries: None,
            max_enqueued_messages: None,
        }
    }
}

fn default_min_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_grow_factor() -> f64 {
    1.3
}
fn default_connection_timeout_ms() -> u64 {
    4000
}

/// Build a figment that layers: defaults → ws-bridge.toml → WS_BRIDGE_* env vars.
///
/// `path` replaces the default `./ws-bridge.toml`. A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("WS_BRIDGE_").split("__"))
}

impl ReconnectOptions {
    pub fn from_file(fc: &ReconnectFileConfig) -> Self {
        Self {
            min_reconnection_delay: Duration::from_millis(fc.min_delay_ms),
            max_reconnection_delay: Duration::from_millis(fc.max_delay_ms),
            reconnection_delay_grow_factor: fc.grow_factor,
            connection_timeout: Duration::from_millis(fc.connection_timeout_ms),
            max_retries: fc.max_retries,
            max_enqueued_messages: fc.max_enqueued_messages,
        }
    }
}

/// Resolved connection settings (runtime view).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionConfig {
    pub url: Option<String>,
    pub origin: Option<Origin>,
    pub protocols: Vec<String>,
}

impl ConnectionConfig {
    /// Fails if the configured origin does not parse.
    pub fn from_file(fc: &ConnectionFileConfig) -> Result<Self> {
        let origin = fc.origin.as_deref().map(Origin::parse).transpose()?;
        Ok(Self {
            url: fc.url.clone(),
            origin,
            protocols: fc.protocols.clone(),
        })
    }
}
