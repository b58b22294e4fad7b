//! Layered configuration: defaults, then an optional TOML file, then
//! environment variable overrides (`WINNY_<SECTION>_<FIELD>`), in the
//! teacher's layering order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServentConfig {
    /// No default on purpose: `ListenAndServe` must error if this is
    /// still zero, since link speed drives direction classification.
    pub speed: u32,
    pub port: u16,
    pub ddns: Option<String>,
    pub clusters: [String; 3],
}

impl Default for ServentConfig {
    fn default() -> Self {
        ServentConfig {
            speed: 0,
            port: 7743,
            ddns: None,
            clusters: [String::new(), String::new(), String::new()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeManagerConfig {
    pub conn_trying_budget: u32,
    pub manage_tick_secs: u64,
    pub upstream_low_watermark: usize,
    pub upstream_high_watermark: usize,
    pub downstream_high_watermark: usize,
}

impl Default for NodeManagerConfig {
    fn default() -> Self {
        NodeManagerConfig {
            conn_trying_budget: 8,
            manage_tick_secs: 4,
            upstream_low_watermark: 2,
            upstream_high_watermark: 3,
            downstream_high_watermark: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryManagerConfig {
    pub spread_tick_secs: u64,
}

impl Default for QueryManagerConfig {
    fn default() -> Self {
        QueryManagerConfig { spread_tick_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub dial_timeout_secs: u64,
    pub max_payload_bytes: usize,
    pub max_cache_res_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            dial_timeout_secs: 10,
            max_payload_bytes: 1 << 20,
            max_cache_res_bytes: 70 << 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servent: ServentConfig,
    pub node_manager: NodeManagerConfig,
    pub query_manager: QueryManagerConfig,
    pub network: NetworkConfig,
}

impl Config {
    /// Loads defaults, overlays an optional TOML file, then overlays
    /// environment variables. `path` overriding the XDG-style default
    /// lookup is typically plumbed in from a CLI flag.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut cfg = match path {
            Some(p) => Config::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Config::from_file(&p)?,
                _ => Config::default(),
            },
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u32("WINNY_SERVENT_SPEED") {
            self.servent.speed = v;
        }
        if let Some(v) = env_u16("WINNY_SERVENT_PORT") {
            self.servent.port = v;
        }
        if let Ok(v) = std::env::var("WINNY_SERVENT_DDNS") {
            self.servent.ddns = Some(v);
        }
        if let Some(v) = env_u32("WINNY_NODE_MANAGER_CONN_TRYING_BUDGET") {
            self.node_manager.conn_trying_budget = v;
        }
        if let Some(v) = env_u64("WINNY_NODE_MANAGER_MANAGE_TICK_SECS") {
            self.node_manager.manage_tick_secs = v;
        }
        if let Some(v) = env_u64("WINNY_QUERY_MANAGER_SPREAD_TICK_SECS") {
            self.query_manager.spread_tick_secs = v;
        }
        if let Some(v) = env_u64("WINNY_NETWORK_DIAL_TIMEOUT_SECS") {
            self.network.dial_timeout_secs = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.servent.speed == 0 {
            // Not an error here: ListenAndServe surfaces this, since a
            // config without speed set is a legitimate intermediate
            // state (e.g. before a first-run wizard prompts for it).
        }
        if self.servent.port == 0 {
            return Err(ConfigError::Validation(
                "servent.port must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("winny").join("winny.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.servent.port, 7743);
        assert_eq!(cfg.node_manager.conn_trying_budget, 8);
        assert_eq!(cfg.node_manager.manage_tick_secs, 4);
        assert_eq!(cfg.query_manager.spread_tick_secs, 30);
        assert_eq!(cfg.network.dial_timeout_secs, 10);
        assert_eq!(cfg.network.max_payload_bytes, 1 << 20);
        assert_eq!(cfg.network.max_cache_res_bytes, 70 << 20);
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut cfg = Config::default();
        cfg.servent.port = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let toml_text = "[servent]\nspeed = 1000\n";
        let cfg: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.servent.speed, 1000);
        assert_eq!(cfg.servent.port, 7743);
    }
}
