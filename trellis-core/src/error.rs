// Error types for the Trellis runtime

use crate::storage::StorageError;
use thiserror::Error;
use trellis_config::ConfigError;

#[derive(Error, Debug)]
pub enum Error {
    /// A required parameter had no context value, default or null fallback
    #[error(
        "Parameter {parameter} of method {method} is unresolvable, it isn't optional, and doesn't match any contextual values"
    )]
    UnresolvableParameter { parameter: String, method: String },

    #[error("Access denied: cannot perform {action} on {entity_type}")]
    AccessDenied { action: String, entity_type: String },

    #[error("Storage adapter {adapter} declared by service {service} does not implement the storage contract")]
    InvalidAdapterContract { service: String, adapter: String },

    #[error("Policy provider {policy} declared by service {service} does not implement the security policy contract")]
    InvalidPolicyContract { service: String, policy: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Field {field} expects a date/time, received {value:?}")]
    InvalidDateTime { field: String, value: String },

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Method {method} does not exist on type {type_name}")]
    MethodNotFound { type_name: String, method: String },

    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No action occurred, unknown command {0}")]
    UnknownCommand(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when this error ends a request
    pub fn status_code(&self) -> u16 {
        match self {
            Error::AccessDenied { .. } => 403,
            Error::MethodNotFound { .. } => 404,
            Error::MalformedPayload(_) | Error::InvalidDateTime { .. } | Error::InvalidArgument(_) => {
                400
            }
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

pub type Result<T> = std::result::Result<T, Error>;
