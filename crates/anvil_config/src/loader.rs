//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::EngineConfig;
use std::path::Path;

/// File name of the engine configuration inside a project directory.
pub const CONFIG_FILE: &str = "anvil.toml";

/// Upper bound on configured worker threads.
const MAX_PARALLELISM: usize = 1024;

/// Loads and validates an `anvil.toml` configuration from a project directory.
///
/// A missing file is not an error: the defaults are returned instead.
pub fn load_config(project_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates an `anvil.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.build.parallelism > MAX_PARALLELISM {
        return Err(ConfigError::ValidationError(format!(
            "build.parallelism {} exceeds the maximum of {MAX_PARALLELISM}",
            config.build.parallelism
        )));
    }
    if config.build.configuration.is_empty() {
        return Err(ConfigError::ValidationError(
            "build.configuration must not be empty".to_string(),
        ));
    }
    if let Some(local) = &config.cache.local {
        if local.enabled && !local.read && !local.write {
            return Err(ConfigError::ValidationError(
                "cache.local allows neither read nor write".to_string(),
            ));
        }
    }
    for (i, remote) in config.cache.remote.iter().enumerate() {
        if remote.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "cache.remote[{i}].address must not be empty"
            )));
        }
        if !remote.read && !remote.write {
            return Err(ConfigError::ValidationError(format!(
                "cache.remote[{i}] allows neither read nor write"
            )));
        }
        if remote.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "cache.remote[{i}].timeout_ms must be positive"
            )));
        }
    }
    Ok(())
}
