//! Storage adapter contract.
//!
//! Synthesized services talk to their backing store only through
//! [`StorageAdapter`]. Rows are plain JSON mappings; the service handle
//! deserializes them into entities.

use crate::error::{Error, Result};
use crate::value::Entity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A single storage row
pub type Row = Map<String, JsonValue>;

/// Errors raised by storage adapters
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Unsupported condition: {0}")]
    UnsupportedCondition(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// A field comparison, e.g. `Id = 4`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: String,
    pub value: JsonValue,
}

impl Condition {
    pub fn new(operator: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            operator: operator.into(),
            value: value.into(),
        }
    }

    pub fn eq(value: impl Into<JsonValue>) -> Self {
        Self::new("=", value)
    }
}

/// Filter passed to [`StorageAdapter::select`]
#[derive(Debug, Clone, PartialEq)]
pub enum Conditions {
    /// AND-combined field comparisons
    Fields(Vec<(String, Condition)>),
    /// A backend-specific filter string
    Raw(String),
}

impl Conditions {
    pub fn none() -> Self {
        Conditions::Fields(Vec::new())
    }

    /// Identifier-equality filter used by the synthesized operations
    pub fn by_id(id: i64) -> Self {
        Conditions::Fields(vec![(Entity::ID_FIELD.to_string(), Condition::eq(id))])
    }

    pub fn and(mut self, field: impl Into<String>, condition: Condition) -> Self {
        if let Conditions::Fields(fields) = &mut self {
            fields.push((field.into(), condition));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Conditions::Fields(fields) => fields.is_empty(),
            Conditions::Raw(raw) => raw.is_empty(),
        }
    }

    /// Parse the `where` argument of a list request.
    ///
    /// Accepts `{"Field": {"operator": "=", "value": 1}}`, a bare
    /// `{"Field": 1}` (equality), a filter string, or `null`/`[]` for no filter.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        match json {
            JsonValue::Null => Ok(Self::none()),
            JsonValue::Array(items) if items.is_empty() => Ok(Self::none()),
            JsonValue::String(raw) => Ok(Conditions::Raw(raw.clone())),
            JsonValue::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (field, spec) in map {
                    let condition = match spec {
                        JsonValue::Object(inner) if inner.contains_key("value") => Condition {
                            operator: inner
                                .get("operator")
                                .and_then(JsonValue::as_str)
                                .unwrap_or("=")
                                .to_string(),
                            value: inner.get("value").cloned().unwrap_or(JsonValue::Null),
                        },
                        other => Condition::eq(other.clone()),
                    };
                    fields.push((field.clone(), condition));
                }
                Ok(Conditions::Fields(fields))
            }
            other => Err(Error::MalformedPayload(format!(
                "cannot build a filter from {}",
                other
            ))),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortOrder::Asc),
            "DESC" => Ok(SortOrder::Desc),
            _ => Err(Error::InvalidArgument(format!("invalid sort order: {}", s))),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical column type derived from an entity field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    String,
    /// Long text
    Text,
    DateTime,
    /// Lists, maps and nested entities
    Json,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::String => "string",
            ColumnType::Text => "text",
            ColumnType::DateTime => "datetime",
            ColumnType::Json => "json",
        }
    }
}

/// Column definition passed to [`StorageAdapter::create_collection`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<JsonValue>,
    pub unique: bool,
}

/// Backing store for a synthesized service.
///
/// Adapters are shared across requests, so implementations synchronize
/// internally.
pub trait StorageAdapter: Send + Sync {
    /// Fetch rows matching `conditions`, ordered by `order_by`
    fn select(
        &self,
        collection: &str,
        conditions: &Conditions,
        start: usize,
        limit: usize,
        order: SortOrder,
        order_by: &str,
    ) -> std::result::Result<Vec<Row>, StorageError>;

    /// Insert a row, returning the generated identifier
    fn insert(&self, collection: &str, fields: &Row) -> std::result::Result<i64, StorageError>;

    fn update(
        &self,
        collection: &str,
        fields: &Row,
        conditions: &Conditions,
    ) -> std::result::Result<bool, StorageError>;

    fn delete(&self, collection: &str, conditions: &Conditions)
    -> std::result::Result<bool, StorageError>;

    /// Ensure the collection exists. The first column is the identifier.
    fn create_collection(
        &self,
        collection: &str,
        columns: &[ColumnSpec],
    ) -> std::result::Result<bool, StorageError>;

    fn drop_collection(&self, collection: &str) -> std::result::Result<(), StorageError>;

    /// Row count of a collection
    fn total(&self, collection: &str) -> std::result::Result<u64, StorageError> {
        let rows = self.select(collection, &Conditions::none(), 0, usize::MAX, SortOrder::Asc, "1")?;
        Ok(rows.len() as u64)
    }
}
