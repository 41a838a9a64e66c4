// Configuration file parsing

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Formats a settings file can be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `KEY=value` lines
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Format of `path` by its extension. A file named `.env` is `Env`.
    pub fn detect(path: &Path) -> Option<Self> {
        match path.file_name().and_then(|name| name.to_str()) {
            Some(".env") => Some(FileFormat::Env),
            _ => Self::from_extension(path.extension()?.to_str()?),
        }
    }
}

/// Reads a settings file into a JSON value
#[derive(Debug, Clone, Copy)]
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Loader for the format detected from `path`
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        FileFormat::detect(path)
            .map(Self::new)
            .ok_or_else(|| ConfigError::unreadable(path.display().to_string(), "unknown file format"))
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::unreadable(location.as_str(), e))?;
        self.parse_from(&location, &content)
    }

    /// Parse in-memory content
    pub fn parse(&self, content: &str) -> Result<Value> {
        self.parse_from("<inline>", content)
    }

    fn parse_from(&self, location: &str, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => {
                serde_json::from_str(content).map_err(|e| ConfigError::malformed(location, e))
            }
            FileFormat::Toml => toml::from_str::<toml::Value>(content)
                .map_err(|e| ConfigError::malformed(location, e))
                .and_then(|table| {
                    serde_json::to_value(table).map_err(|e| ConfigError::malformed(location, e))
                }),
            FileFormat::Env => Ok(Value::Object(env_lines(content))),
        }
    }
}

/// `KEY=value` pairs. Blank lines and `#`/`;` comments are skipped, an
/// `export ` prefix is dropped and one layer of quotes is removed.
fn env_lines(content: &str) -> Map<String, Value> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(['#', ';']))
        .map(|line| line.strip_prefix("export ").unwrap_or(line))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let unquoted = [('"', '"'), ('\'', '\'')]
                .iter()
                .find_map(|(open, close)| value.strip_prefix(*open)?.strip_suffix(*close))
                .unwrap_or(value);
            (key.trim().to_string(), Value::String(unquoted.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let settings = loader.parse(r#"{"mysql_host": "db", "http_port": 8080}"#).unwrap();

        assert_eq!(settings["mysql_host"], "db");
        assert_eq!(settings["http_port"], 8080);
    }

    #[test]
    fn test_parse_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let settings = loader
            .parse("log_level = \"debug\"\nhttp_port = 9000\n")
            .unwrap();

        assert_eq!(settings["log_level"], "debug");
        assert_eq!(settings["http_port"], 9000);
    }

    #[test]
    fn test_parse_env_lines() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let settings = loader
            .parse(
                "mysql_user=root\n# comment\n; ini comment\nexport mysql_db=\"shop\"\nmysql_password='se=cret'\nnot a pair\n",
            )
            .unwrap();

        assert_eq!(settings["mysql_user"], "root");
        assert_eq!(settings["mysql_db"], "shop");
        assert_eq!(settings["mysql_password"], "se=cret");
        assert_eq!(settings.as_object().map(Map::len), Some(3));
    }

    #[test]
    fn test_malformed_json_names_location() {
        let loader = ConfigLoader::new(FileFormat::Json);
        match loader.parse("{not json") {
            Err(ConfigError::Malformed { location, .. }) => assert_eq!(location, "<inline>"),
            other => panic!("expected a malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert_eq!(FileFormat::detect(Path::new("config/.env")), Some(FileFormat::Env));
        assert_eq!(FileFormat::detect(Path::new("app.json")), Some(FileFormat::Json));
        assert_eq!(FileFormat::detect(Path::new("README")), None);
        assert!(ConfigLoader::auto("settings.ini").is_err());
    }
}
