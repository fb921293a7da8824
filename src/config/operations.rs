//! Config loading, validation, and utility operations.

use super::model::Config;
use super::types::LOG_LEVELS;
use crate::error::{BrokerError, Result};
use std::path::Path;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML config file
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(BrokerError::UserError)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| BrokerError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            BrokerError::SerializationError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `default_lock_timeout_ms` must be positive
    /// - `log_level` must be one of trace/debug/info/warn/error
    /// - `simulation.workers`, `objects` and `iterations` must be positive
    /// - `simulation.write_percent` must not exceed 100
    pub fn validate(&self) -> Result<()> {
        if self.default_lock_timeout_ms == 0 {
            return Err(invalid(
                "default_lock_timeout_ms must be greater than 0 (pass an explicit 0 timeout to wait indefinitely)",
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(BrokerError::UserError(format!(
                "config validation failed: log_level must be one of {} (found '{}')",
                LOG_LEVELS.join(", "),
                self.log_level
            )));
        }

        let sim = &self.simulation;
        if sim.workers == 0 {
            return Err(invalid("simulation.workers must be greater than 0"));
        }
        if sim.objects == 0 {
            return Err(invalid("simulation.objects must be greater than 0"));
        }
        if sim.iterations == 0 {
            return Err(invalid("simulation.iterations must be greater than 0"));
        }
        if sim.write_percent > 100 {
            return Err(BrokerError::UserError(format!(
                "config validation failed: simulation.write_percent must be at most 100 (found {})",
                sim.write_percent
            )));
        }

        Ok(())
    }
}

fn invalid(reason: &str) -> BrokerError {
    BrokerError::UserError(format!("config validation failed: {}", reason))
}
