// src/config/loader.rs
//! Configuration loader
//!
//! Layers, lowest precedence first: built-in defaults, each configuration file
//! that exists (in the order given), then `NODE_` environment variables. A
//! double underscore separates sections from keys, so
//! `NODE_IMPEDANCE__POLL_BUDGET=500` sets `impedance.poll_budget`.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::NodeConfig;

const ENV_PREFIX: &str = "NODE_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("configuration parse error: {0}")]
    Parse(String),

    #[error("configuration serialize error: {0}")]
    Serialize(String),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    use_environment: bool,
    current_config: RwLock<NodeConfig>,
}

impl ConfigLoader {
    /// Loader over the conventional locations
    pub fn new() -> Self {
        Self::with_paths(vec![PathBuf::from("config/node.toml"), PathBuf::from("node.toml")])
    }

    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            config_paths: paths,
            use_environment: true,
            current_config: RwLock::new(NodeConfig::default()),
        }
    }

    /// Ignore `NODE_` variables
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    /// Merge all layers, validate, and remember the result
    pub fn load(&self) -> Result<NodeConfig, ConfigError> {
        let config = self.load_and_merge_configs()?;
        *self.current_config.write() = config.clone();
        info!(slave_address = config.identity.slave_address, "configuration loaded");
        Ok(config)
    }

    pub fn current(&self) -> NodeConfig {
        self.current_config.read().clone()
    }

    /// Parse and validate a single file without touching the loader state
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<NodeConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Self::load_str(&std::fs::read_to_string(path)?)
    }

    pub fn load_str(content: &str) -> Result<NodeConfig, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Write the current configuration as TOML
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(&self.current()).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn load_and_merge_configs(&self) -> Result<NodeConfig, ConfigError> {
        let mut merged = toml::Value::try_from(NodeConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        for path in &self.config_paths {
            if !path.exists() {
                continue;
            }
            debug!(path = %path.display(), "merging configuration file");
            let content = std::fs::read_to_string(path)?;
            let overlay: toml::Value = toml::from_str(&content)?;
            merge_toml_values(&mut merged, overlay);
        }

        if self.use_environment {
            apply_environment_overrides(&mut merged, std::env::vars());
        }

        let config: NodeConfig = merged.try_into()?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_toml_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_toml_values(base_value, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base_value, overlay_value) => *base_value = overlay_value,
    }
}

fn apply_environment_overrides(config: &mut toml::Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, value) in vars {
        let Some(path) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let parts: Vec<String> = path.split(ENV_SEPARATOR).map(str::to_lowercase).collect();
        debug!(variable = %key, "environment override");
        set_nested_value(config, &parts, parse_env_value(&value));
    }
}

fn parse_env_value(value: &str) -> toml::Value {
    if let Ok(int_val) = value.parse::<i64>() {
        toml::Value::Integer(int_val)
    } else if let Ok(bool_val) = value.parse::<bool>() {
        toml::Value::Boolean(bool_val)
    } else {
        toml::Value::String(value.to_string())
    }
}

fn set_nested_value(config: &mut toml::Value, parts: &[String], value: toml::Value) {
    let Some((last, sections)) = parts.split_last() else {
        return;
    };
    let mut current = config;
    for part in sections {
        let toml::Value::Table(table) = current else {
            return;
        };
        current = table
            .entry(part.clone())
            .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
    }
    if let toml::Value::Table(table) = current {
        table.insert(last.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ad5933::ClockSource;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_defaults_without_files() {
        let loader = ConfigLoader::with_paths(vec![PathBuf::from("/nonexistent/node.toml")]).without_environment();
        assert_eq!(loader.load().unwrap(), NodeConfig::default());
    }

    #[test]
    fn test_files_layer_in_order() {
        let mut first = NamedTempFile::new().unwrap();
        writeln!(first, "[periods]\nimpedance_ms = 500\ntemperature_ms = 700").unwrap();
        let mut second = NamedTempFile::new().unwrap();
        writeln!(second, "[periods]\nimpedance_ms = 250").unwrap();

        let loader =
            ConfigLoader::with_paths(vec![first.path().to_path_buf(), second.path().to_path_buf()]).without_environment();
        let config = loader.load().unwrap();

        assert_eq!(config.periods.impedance_ms, 250);
        assert_eq!(config.periods.temperature_ms, 700);
        assert_eq!(loader.current(), config);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[impedance]\nsettling_multiplier = 3").unwrap();
        assert!(matches!(ConfigLoader::load_file(file.path()), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::load_file("/nonexistent/node.toml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(ConfigLoader::load_str("[identity\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_environment_override() {
        let mut merged = toml::Value::try_from(NodeConfig::default()).unwrap();
        apply_environment_overrides(
            &mut merged,
            vec![
                ("NODE_IMPEDANCE__POLL_BUDGET".to_string(), "500".to_string()),
                ("NODE_IMPEDANCE__CLOCK".to_string(), "internal".to_string()),
                ("UNRELATED".to_string(), "1".to_string()),
            ],
        );
        let config: NodeConfig = merged.try_into().unwrap();
        assert_eq!(config.impedance.poll_budget, 500);
        assert_eq!(config.impedance.clock, ClockSource::Internal);
    }

    #[test]
    fn test_export_round_trip() {
        let loader = ConfigLoader::with_paths(Vec::new()).without_environment();
        loader.load().unwrap();
        let file = NamedTempFile::new().unwrap();
        loader.export(file.path()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("[impedance]"));
        assert_eq!(ConfigLoader::load_file(file.path()).unwrap(), NodeConfig::default());
    }
}
