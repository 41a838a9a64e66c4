// Per-request parameter context

use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Values a method's parameters are resolved against, by parameter name.
///
/// Built once per request and discarded afterwards. `query` is only
/// consulted for scalar parameters that have neither a value here nor a
/// declared default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub values: HashMap<String, JsonValue>,
    pub query: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body keys first, then path captures; captures win on collision.
    /// A body that is not a JSON object contributes nothing.
    pub fn from_request(
        body: Option<JsonValue>,
        path_params: &HashMap<String, String>,
        query: HashMap<String, String>,
    ) -> Self {
        let mut values = HashMap::new();
        if let Some(JsonValue::Object(map)) = body {
            values.extend(map);
        }
        for (name, value) in path_params {
            values.insert(name.clone(), JsonValue::String(value.clone()));
        }
        Self { values, query }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: JsonValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.values.get(name)
    }

    pub fn query(&self, name: &str) -> Option<&String> {
        self.query.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.query.is_empty()
    }
}
