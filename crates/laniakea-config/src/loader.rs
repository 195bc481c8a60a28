use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::LaniakeaConfig;
use laniakea_core::LaniakeaError;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "laniakea-plugin.toml";

/// Loads the plugin configuration.
pub struct ConfigLoader {
    config: LaniakeaConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > LANIAKEA_PLUGIN_CONFIG env > ./laniakea-plugin.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("LANIAKEA_PLUGIN_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> laniakea_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw).map_err(|e| {
                LaniakeaError::Config(format!("failed to parse {}: {}", config_path.display(), e))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            LaniakeaConfig::default()
        };

        let config = Self::apply_overrides(config, |key| std::env::var(key).ok());

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(LaniakeaError::Config(e));
            }
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Parse a TOML document; missing sections and fields take their defaults.
    pub fn parse(raw: &str) -> Result<LaniakeaConfig, toml::de::Error> {
        toml::from_str(raw)
    }

    /// The loaded configuration.
    pub fn get(&self) -> &LaniakeaConfig {
        &self.config
    }

    /// Consume the loader, keeping the configuration.
    pub fn into_config(self) -> LaniakeaConfig {
        self.config
    }

    /// Path the configuration was resolved from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply overrides (LANIAKEA_PLUGIN_LISTEN, LANIAKEA_LOG_LEVEL, LANIAKEA_STREAM_BUFFER)
    /// read through `lookup`.
    pub fn apply_overrides(
        mut config: LaniakeaConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> LaniakeaConfig {
        if let Some(v) = lookup("LANIAKEA_PLUGIN_LISTEN") {
            config.server.listen = v;
        }
        if let Some(v) = lookup("LANIAKEA_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("LANIAKEA_STREAM_BUFFER") {
            match v.parse::<usize>() {
                Ok(buffer) => config.stream.buffer = buffer,
                Err(e) => warn!(value = %v, error = %e, "ignoring invalid LANIAKEA_STREAM_BUFFER"),
            }
        }
        config
    }
}
