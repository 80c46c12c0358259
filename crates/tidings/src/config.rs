use etcetera::{choose_app_strategy, AppStrategy, AppStrategyArgs};
use once_cell::sync::{Lazy, OnceCell};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub static APP_STRATEGY: Lazy<AppStrategyArgs> = Lazy::new(|| AppStrategyArgs {
    top_level_domain: "Bluelabel".to_string(),
    author: "Bluelabel".to_string(),
    app_name: "tidings".to_string(),
});

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration value not found: {0}")]
    NotFound(String),
    #[error("Failed to deserialize value: {0}")]
    DeserializeError(String),
    #[error("Failed to read config file: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Failed to create config directory: {0}")]
    DirectoryError(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::DeserializeError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::DeserializeError(err.to_string())
    }
}

/// Configuration management for Tidings.
///
/// Values are loaded with the following precedence:
/// 1. Environment variables (key uppercased for the lookup)
/// 2. Configuration file (~/.config/tidings/config.yaml by default)
///
/// Secrets follow the same precedence but read from a separate secrets
/// file (~/.config/tidings/secrets.yaml) rather than the config file, so
/// the config file stays safe to commit or share.
pub struct Config {
    config_path: PathBuf,
    secrets_path: PathBuf,
}

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

impl Default for Config {
    fn default() -> Self {
        // choose_app_strategy().config_dir()
        // - macOS/Linux: ~/.config/tidings/
        // - Windows:     ~\AppData\Roaming\Bluelabel\tidings\config\
        let config_dir = choose_app_strategy(APP_STRATEGY.clone())
            .expect("tidings requires a home dir")
            .config_dir();

        std::fs::create_dir_all(&config_dir).expect("Failed to create config directory");

        Config {
            config_path: config_dir.join("config.yaml"),
            secrets_path: config_dir.join("secrets.yaml"),
        }
    }
}

impl Config {
    /// Get the global configuration instance, initializing it with the
    /// default paths if needed.
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Create a configuration instance with custom paths. Primarily useful
    /// for tests and for applications managing multiple configurations.
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(
        config_path: P1,
        secrets_path: P2,
    ) -> Result<Self, ConfigError> {
        Ok(Config {
            config_path: config_path.as_ref().to_path_buf(),
            secrets_path: secrets_path.as_ref().to_path_buf(),
        })
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    pub fn path(&self) -> String {
        self.config_path.to_string_lossy().to_string()
    }

    fn load_file(path: &Path) -> Result<HashMap<String, Value>, ConfigError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let file_content = std::fs::read_to_string(path)?;
        let yaml_value: serde_yaml::Value = serde_yaml::from_str(&file_content)?;
        let json_value = serde_json::to_value(yaml_value)?;
        match json_value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(HashMap::new()),
            _ => Err(ConfigError::DeserializeError(
                "config file must contain a mapping".to_string(),
            )),
        }
    }

    /// Load current values from the config file.
    pub fn load_values(&self) -> Result<HashMap<String, Value>, ConfigError> {
        Self::load_file(&self.config_path)
    }

    fn get_from(
        path: &Path,
        key: &str,
        env_override: bool,
    ) -> Result<Value, ConfigError> {
        if env_override {
            let env_key = key.to_uppercase();
            if let Ok(val) = env::var(&env_key) {
                // Environment variables are plain strings; try structured
                // parse first so numbers and booleans round-trip.
                return Ok(serde_json::from_str(&val).unwrap_or(Value::String(val)));
            }
        }

        let values = Self::load_file(path)?;
        values
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))
    }

    /// Get a configuration value (non-secret).
    pub fn get_param<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = Self::get_from(&self.config_path, key, true)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Get a secret value from the environment or the secrets file.
    pub fn get_secret<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = Self::get_from(&self.secrets_path, key, true)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Set a configuration value in the config file.
    pub fn set_param(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut values = Self::load_file(&self.config_path)?;
        values.insert(key.to_string(), value);
        self.write_values(&self.config_path, &values)
    }

    /// Set a secret value in the secrets file.
    pub fn set_secret(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut values = Self::load_file(&self.secrets_path)?;
        values.insert(key.to_string(), value);
        self.write_values(&self.secrets_path, &values)
    }

    fn write_values(
        &self,
        path: &Path,
        values: &HashMap<String, Value>,
    ) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::DirectoryError(e.to_string()))?;
        }
        let yaml_value = serde_yaml::to_string(values)?;
        std::fs::write(path, yaml_value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_file_values_roundtrip() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("config.yaml"), dir.path().join("secrets.yaml"))
            .unwrap();

        config.set_param("local_llm_host", json!("http://localhost:11434")).unwrap();
        config.set_param("local_llm_enabled", json!(true)).unwrap();

        let host: String = config.get_param("local_llm_host").unwrap();
        assert_eq!(host, "http://localhost:11434");
        let enabled: bool = config.get_param("local_llm_enabled").unwrap();
        assert!(enabled);
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("config.yaml"), dir.path().join("secrets.yaml"))
            .unwrap();

        let result: Result<String, _> = config.get_param("tidings_test_no_such_key");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_secrets_live_in_their_own_file() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("config.yaml"), dir.path().join("secrets.yaml"))
            .unwrap();

        config.set_secret("tidings_test_api_key", json!("sk-none")).unwrap();

        let secret: String = config.get_secret("tidings_test_api_key").unwrap();
        assert_eq!(secret, "sk-none");
        // The config file must not see it.
        let result: Result<String, _> = config.get_param("tidings_test_api_key");
        assert!(result.is_err());
    }
}
