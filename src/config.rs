//! Configuration (§6, §2 ambient stack): a single TOML file with a `[pool]`
//! and `[router]` top-level section plus one `[plugins.<name>]` table per
//! plugin instance carrying a `type` tag and the common options from §6.
//! Plugin-specific options (transport details) are left as an open
//! `toml::Table` since the concrete plugins (transports, codecs) are
//! external collaborators this crate doesn't implement.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::matcher::MatcherSpecification;

fn default_pool_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: default_pool_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub ingress_capacity: usize,
    pub delivery_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            ingress_capacity: 1000,
            delivery_capacity: 10,
        }
    }
}

/// Common options every plugin section carries (§6): `message_matcher`,
/// `message_signer`, `ticker_interval`, `can_exit`, `encoder`/`decoder`,
/// `use_framing`, `retries`.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub message_matcher: Option<String>,
    #[serde(default)]
    pub message_signer: Option<String>,
    #[serde(default)]
    pub ticker_interval_secs: Option<u64>,
    #[serde(default = "default_can_exit")]
    pub can_exit: bool,
    #[serde(default)]
    pub encoder: Option<String>,
    #[serde(default)]
    pub decoder: Option<String>,
    #[serde(default)]
    pub use_framing: bool,
    #[serde(default)]
    pub retries: Option<u32>,
    /// Plugin-specific fields (transport host/port, file path, etc), not
    /// interpreted by this crate.
    #[serde(flatten)]
    pub extra: toml::value::Table,
}

fn default_can_exit() -> bool {
    true
}

impl PluginConfig {
    /// Compiles `message_matcher`, if set.
    pub fn compiled_matcher(&self) -> Result<Option<MatcherSpecification>, ConfigError> {
        match &self.message_matcher {
            Some(src) => Ok(Some(MatcherSpecification::compile(src).map_err(|source| ConfigError::Matcher {
                section: self.plugin_type.clone(),
                source,
            })?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.capacity".into(),
                reason: "must be greater than zero".into(),
            });
        }
        for (name, plugin) in &self.plugins {
            if plugin.plugin_type.is_empty() {
                return Err(ConfigError::MissingField(format!("plugins.{name}.type")));
            }
            plugin.compiled_matcher().map_err(|e| match e {
                ConfigError::Matcher { source, .. } => ConfigError::Matcher {
                    section: name.clone(),
                    source,
                },
                other => other,
            })?;
            // Open question (resolved in DESIGN.md): use_framing on a UDP
            // transport is a configuration error, not a runtime retry --
            // UDP has no byte-stream boundary for the framing header to ride on.
            if plugin.use_framing && plugin.plugin_type.to_ascii_lowercase().contains("udp") {
                return Err(ConfigError::InvalidValue {
                    field: format!("plugins.{name}.use_framing"),
                    reason: "use_framing is not valid on a UDP-based plugin".into(),
                });
            }
        }
        Ok(())
    }
}
