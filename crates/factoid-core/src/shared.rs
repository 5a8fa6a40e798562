//! Process-wide configuration.

use crate::ratelimit::DEFAULT_COOLDOWN;
use crate::render::{DEFAULT_CHECK_INTERVAL, DEFAULT_TEMPLATE_PATH};
use crate::trigger::DEFAULT_TRIGGER_MARKER;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Gateway and knowledge-base configuration. Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Bot identity shown on the status endpoint.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Base directory for the sled DB holding factoids.
    pub storage_path: String,
    /// Handlebars template for the factoid listing, relative to the working directory.
    pub template_path: String,
    /// HTTP path the listing is served on.
    pub hook_path: String,
    /// Prefix that turns a chat line into a factoid trigger.
    pub trigger_marker: String,
    /// Cooldown between two honored triggers of the same factoid.
    pub cooldown_secs: u64,
    /// How often the template file is checked for changes.
    pub template_check_secs: u64,
}

impl CoreConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn template_check_interval(&self) -> Duration {
        Duration::from_secs(self.template_check_secs.max(1))
    }

    /// Load config from file and environment. Precedence: env `FACTOID_CONFIG` path > `config/gateway.toml` > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("FACTOID_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load config with `path` as the optional file source. `FACTOID__*` env vars win over the file.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("app_name", "Factoid Gateway")?
            .set_default("port", 8001_i64)?
            .set_default("storage_path", "./data")?
            .set_default("template_path", DEFAULT_TEMPLATE_PATH)?
            .set_default("hook_path", "/factoids")?
            .set_default("trigger_marker", DEFAULT_TRIGGER_MARKER)?
            .set_default("cooldown_secs", DEFAULT_COOLDOWN.as_secs() as i64)?
            .set_default("template_check_secs", DEFAULT_CHECK_INTERVAL.as_secs() as i64)?;

        // `config/gateway` also matches `config/gateway.toml`.
        let built = builder
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("FACTOID").separator("__"))
            .build()?;

        built.try_deserialize()
    }
}
