//! Configuration loader.
//!
//! Loads `orchestra.yaml` from a config directory, merges an optional
//! `orchestra.{environment}.yaml` overlay on top, validates, and hands back
//! an immutable [`ConfigManager`].

use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{OrchestraError, Result};
use crate::logging::detect_environment;

use super::OrchestraConfig;

pub struct ConfigManager {
    config: OrchestraConfig,
    environment: String,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    pub fn load(config_dir: &Path) -> Result<Arc<ConfigManager>> {
        let environment = detect_environment();
        Self::load_with_env(config_dir, &environment)
    }

    /// Load configuration with an explicit environment (used by tests so
    /// global environment variables stay untouched).
    pub fn load_with_env(config_dir: &Path, environment: &str) -> Result<Arc<ConfigManager>> {
        let base_path = config_dir.join("orchestra.yaml");
        let overlay_path = config_dir.join(format!("orchestra.{environment}.yaml"));

        debug!(
            environment = environment,
            base = %base_path.display(),
            "Loading configuration"
        );

        let mut merged = Self::read_yaml(&base_path)?;
        if overlay_path.exists() {
            let overlay = Self::read_yaml(&overlay_path)?;
            merge_yaml(&mut merged, overlay);
        }

        let config: OrchestraConfig = serde_yaml::from_value(merged)
            .map_err(|e| OrchestraError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate().map_err(OrchestraError::Configuration)?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
        }))
    }

    /// Built-in defaults, no files involved.
    pub fn default_config() -> Arc<ConfigManager> {
        Arc::new(ConfigManager {
            config: OrchestraConfig::default(),
            environment: detect_environment(),
        })
    }

    fn read_yaml(path: &PathBuf) -> Result<YamlValue> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestraError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&raw).map_err(|e| {
            OrchestraError::Configuration(format!("cannot parse {}: {e}", path.display()))
        })
    }

    pub fn config(&self) -> &OrchestraConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

/// Deep-merge `overlay` into `base`: mappings merge recursively, everything
/// else is replaced by the overlay value.
fn merge_yaml(base: &mut YamlValue, overlay: YamlValue) {
    match (base, overlay) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}
