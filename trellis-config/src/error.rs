// Configuration errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration value for key {0}")]
    Missing(String),

    /// A configuration source could not be read at all
    #[error("Cannot read configuration from {location}: {reason}")]
    Unreadable { location: String, reason: String },

    /// A source was read but its content is not usable settings
    #[error("Malformed configuration in {location}: {reason}")]
    Malformed { location: String, reason: String },

    #[error("Cannot store a value under {key}: {reason}")]
    Unencodable { key: String, reason: String },

    #[error("Value of {key} has the wrong type: {reason}")]
    WrongType { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn malformed(location: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Malformed {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unreadable(location: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Unreadable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
