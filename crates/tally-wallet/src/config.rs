//! Wallet engine configuration.
//!
//! [`WalletConfig`] is layered from built-in defaults, an optional TOML
//! file and `TALLY_*` environment variables (nested keys separated by
//! `__`, e.g. `TALLY_GAP_LIMIT=30`). Loading validates everything up
//! front: a bad gap limit or era table is an error, never a default.

use std::path::Path;
use std::sync::Arc;

use ::config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};
use tally_core::constants::{DEFAULT_GAP_LIMIT, MAX_GAP_LIMIT};
use tally_core::network::{NetworkConfigRecord, NetworkDescriptor};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::error::ConfigError;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "TALLY";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    /// Discovery batch size.
    pub gap_limit: u32,
    /// Log level filter string (e.g. "info", "tally_wallet=debug").
    pub log_level: String,
    /// `"json"` for structured output, anything else for plain text.
    pub log_format: String,
    pub networks: Vec<NetworkConfigRecord>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            gap_limit: DEFAULT_GAP_LIMIT,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            networks: NetworkConfigRecord::presets(),
        }
    }
}

impl WalletConfig {
    /// Load defaults, then `path` (if given and present), then the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading overrides from `env` instead of
    /// the process environment when it is `Some`.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let defaults = Config::try_from(&WalletConfig::default()).map_err(load_error)?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env);
        let cfg: WalletConfig = builder
            .add_source(environment)
            .build()
            .map_err(load_error)?
            .try_deserialize()
            .map_err(load_error)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the gap limit and that every network resolves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gap_limit == 0 || self.gap_limit > MAX_GAP_LIMIT {
            return Err(ConfigError::InvalidGapLimit { value: self.gap_limit, max: MAX_GAP_LIMIT });
        }
        NetworkDescriptor::from_records(&self.networks)?;
        Ok(())
    }

    /// Resolved network descriptors, in declaration order.
    pub fn resolve_networks(&self) -> Result<Vec<Arc<NetworkDescriptor>>, ConfigError> {
        Ok(NetworkDescriptor::from_records(&self.networks)?.into_iter().map(Arc::new).collect())
    }
}

fn load_error(e: ::config::ConfigError) -> ConfigError {
    ConfigError::Load(e.to_string())
}

/// Install the global subscriber. `RUST_LOG` wins over `level`; `format`
/// `"json"` selects JSON lines.
///
/// Later calls are no-ops.
pub fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let installed = if format == "json" {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
