// Configuration holder for the Trellis runtime
//
// One `ConfigManager` is created at process start and handed to the resolver,
// which injects it wherever a parameter asks for the configuration holder.

pub mod env;
pub mod error;
pub mod loader;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Key/value configuration store shared by every clone
#[derive(Clone, Default)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::default(),
            env_prefix: Some(prefix.into()),
        }
    }

    /// Process environment first, then a `.env` file in the working
    /// directory when one exists.
    pub fn from_environment() -> Result<Self> {
        let manager = Self::new();
        manager.load_env();

        let dotenv = Path::new(".env");
        if dotenv.is_file() {
            manager.load_file(dotenv, FileFormat::Env)?;
        }

        Ok(manager)
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) {
        let env_vars = EnvLoader::new(self.env_prefix.clone()).load();
        let count = env_vars.len();

        let mut config = self.config.write();
        for (key, value) in env_vars {
            config.insert(key, Value::String(value));
        }

        debug!(count, "Loaded environment variables into configuration");
    }

    /// Export a `.env` file into the process environment, then reload it
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path)
                    .map_err(|e| ConfigError::unreadable(path.display().to_string(), e))?;
            }
            None => {
                // A missing .env in the working directory is not an error
                dotenvy::dotenv().ok();
            }
        }
        self.load_env();
        Ok(())
    }

    /// Merge the top-level keys of a config file
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;

        let Value::Object(map) = data else {
            return Err(ConfigError::malformed(
                path.display().to_string(),
                "expected a table of settings",
            ));
        };

        let count = map.len();
        let mut config = self.config.write();
        config.extend(map);

        debug!(path = %path.display(), count, "Loaded configuration file");
        Ok(())
    }

    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<&Self> {
        let json_value = serde_json::to_value(value).map_err(|e| ConfigError::Unencodable {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        self.config.write().insert(key.to_string(), json_value);
        Ok(self)
    }

    /// Typed lookup. String values are also tried as JSON literals so that
    /// environment values like `8080` or `true` read back as numbers/bools.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .get_raw(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        let wrong_type = |err: serde_json::Error| ConfigError::WrongType {
            key: key.to_string(),
            reason: err.to_string(),
        };

        match serde_json::from_value::<T>(value.clone()) {
            Ok(typed) => Ok(typed),
            Err(err) => match &value {
                Value::String(text) => serde_json::from_str::<T>(text).map_err(|_| wrong_type(err)),
                _ => Err(wrong_type(err)),
            },
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.config.read().get(key).cloned()
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        self.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.config.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.config.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy every key of `other` over this manager's values
    pub fn merge(&self, other: &ConfigManager) {
        if Arc::ptr_eq(&self.config, &other.config) {
            return;
        }
        let other_config = other.config.read().clone();
        self.config.write().extend(other_config);
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("keys", &self.keys())
            .field("env_prefix", &self.env_prefix)
            .finish()
    }
}
