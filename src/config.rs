//! Bridge configuration.
//!
//! Settings load from `BRIDGE_*` environment variables (after an optional
//! `.env` file), with builder defaults so the bridge runs with no
//! environment at all: `BRIDGE_ADAPTER`, `BRIDGE_CALL_TIMEOUT_MS`,
//! `BRIDGE_LOG_DIR`.

use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config as ConfigLib, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Card backend: "simulated" or "native".
    pub adapter: String,
    /// Deadline for each native call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
}

impl BridgeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    /// Load with an explicit override map instead of the process environment
    /// — keeps tests independent of ambient variables.
    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("adapter", "simulated")?
            .set_default("call_timeout_ms", 10_000)?
            .set_default("log_dir", "logs")?;

        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            builder = builder.add_source(Environment::with_prefix("BRIDGE"));
        }

        builder.build()?.try_deserialize()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
