use crate::{Error, Result};
use apidaemon_rpc::MAX_PAYLOAD_SIZE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on reading a request and on invoking its method.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long `stop` waits for in-flight connections.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_max_payload")]
    pub max_payload_size: usize,

    #[serde(default)]
    pub plugins: BTreeMap<String, PluginConfig>,

    #[serde(default)]
    pub notificator: Option<NotifierConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8760
}

fn default_request_timeout() -> u64 {
    30
}

fn default_drain_timeout() -> u64 {
    10
}

fn default_max_payload() -> usize {
    MAX_PAYLOAD_SIZE
}

fn default_true() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            drain_timeout_secs: default_drain_timeout(),
            max_payload_size: default_max_payload(),
            plugins: BTreeMap::new(),
            notificator: None,
        }
    }
}

impl Config {
    /// Load config from file, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails
    /// [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, &path.display().to_string());
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that deserialize fine but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "requestTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        if self.drain_timeout_secs == 0 {
            return Err(Error::Config(
                "drainTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        if self.max_payload_size == 0 {
            return Err(Error::Config(
                "maxPayloadSize must be greater than zero".to_string(),
            ));
        }
        if let Some(name) = self.plugins.keys().find(|name| !is_namespace(name)) {
            return Err(Error::Config(format!("invalid plugin namespace: '{name}'")));
        }
        Ok(())
    }

    /// `host:port` suitable for binding.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn is_namespace(name: &str) -> bool {
    !name.is_empty() && !name.contains(apidaemon_rpc::PATH_SEPARATOR)
}

/// One entry under `plugins`. Keys other than `type`, `enabled` and
/// `use_notify` are handed to the plugin factory unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Factory to build the plugin with; defaults to the namespace name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub use_notify: bool,

    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl PluginConfig {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            enabled: true,
            use_notify: false,
            params: Map::new(),
        }
    }

    /// Factory kind for the entry registered under `name`.
    #[must_use]
    pub fn kind_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.kind.as_deref().unwrap_or(name)
    }
}

/// The `notificator` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub kind: NotifierKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierKind {
    /// Write reports to the daemon log.
    Log,

    /// Pipe reports into an external program.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_command_timeout")]
        timeout_secs: u64,
    },
}
