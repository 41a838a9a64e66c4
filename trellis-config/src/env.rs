// Process environment as a configuration source

use std::collections::HashMap;
use std::env;

/// Reads process environment variables, optionally restricted to a prefix.
///
/// Settings keys are lower-case: under prefix `APP`, the variable
/// `APP_MYSQL_HOST` becomes `mysql_host`. Variables outside the prefix are
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Every matching variable, keyed by settings key
    pub fn load(&self) -> HashMap<String, String> {
        env::vars()
            .filter_map(|(name, value)| Some((self.settings_key(&name)?, value)))
            .collect()
    }

    /// One variable, looked up by settings key
    pub fn var(&self, key: &str) -> Option<String> {
        env::var(self.variable_name(key)).ok()
    }

    /// Environment variable that backs `key`
    pub fn variable_name(&self, key: &str) -> String {
        let key = key.to_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key),
            None => key,
        }
    }

    fn settings_key(&self, name: &str) -> Option<String> {
        let name = match &self.prefix {
            Some(prefix) => name.strip_prefix(prefix.as_str())?.trim_start_matches('_'),
            None => name,
        };
        (!name.is_empty()).then(|| name.to_lowercase())
    }
}
