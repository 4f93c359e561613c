//! Engine configuration.
//!
//! [`EngineConfig::load`] reads the `[entgraph]` section of
//! `config/config.toml` (optional) and lets `ENTGRAPH__*` environment
//! variables override it, e.g. `ENTGRAPH__URL=postgres://localhost/app`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE: &str = "config/config.toml";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Driver URL; the scheme picks the driver (`sqlite:`, `postgres:`)
    #[serde(default = "default_url")]
    pub url: String,
    /// Log every statement at debug level under `entgraph::sql`
    #[serde(default)]
    pub debug: bool,
    /// Deadline applied to operations whose context has none
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
}

fn default_url() -> String {
    "sqlite::memory:".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            debug: false,
            query_timeout_ms: None,
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("ENTGRAPH")
        .separator("__")
        .keep_prefix(true)
}

impl EngineConfig {
    /// Load from `config/config.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(environment());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!(
                        target: "entgraph::config",
                        "failed to load {CONFIG_FILE}, falling back to env: {err}"
                    );
                }
                Config::builder()
                    .add_source(environment())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "failed to load configuration from file ({err}) and env ({env_err})"
                        ))
                    })?
            }
        };
        Self::from_settings(&settings)
    }

    /// Parse a TOML document holding an `[entgraph]` section.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        Self::from_settings(&settings)
    }

    fn from_settings(settings: &Config) -> Result<Self, ConfigError> {
        match settings.get::<Option<EngineConfig>>("entgraph") {
            Ok(Some(cfg)) => Ok(cfg),
            Ok(None) | Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "entgraph configuration is invalid: {e}"
            ))),
        }
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}
