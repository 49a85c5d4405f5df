//! Server configuration
//!
//! Layered: built-in defaults, then an optional config file, then
//! `GREENLIGHT_*` environment variables (`__` as the section
//! separator, e.g. `GREENLIGHT_ESCALATION__BATCH_LIMIT=100`).

use serde::Deserialize;
use std::path::Path;

/// Top-level settings for greenlightd
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Postgres connection string; absent means in-memory storage
    #[serde(default)]
    pub database_url: Option<String>,
    /// Escalation sweep tuning
    pub escalation: EscalationSettings,
}

/// Escalation sweep settings
#[derive(Clone, Debug, Deserialize)]
pub struct EscalationSettings {
    /// Seconds between sweep ticks
    pub sweep_interval_secs: u64,
    /// Maximum due actions handled per tick
    pub batch_limit: usize,
}

impl Settings {
    /// Load settings from defaults, an optional file, and environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("bind_addr", "0.0.0.0:8080")?
            .set_default("escalation.sweep_interval_secs", 300_i64)?
            .set_default("escalation.batch_limit", 50_i64)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder
            .add_source(config::Environment::with_prefix("GREENLIGHT").separator("__"));

        builder.build()?.try_deserialize()
    }
}
