// HTTP request and response types

use crate::error::{Error, Result};
use crate::value::{Entity, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";

/// HTTP request wrapper
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
}

impl HttpRequest {
    /// Build a request; a query string on `target` is split off and decoded
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), parse_query_string(query)),
            None => (target, HashMap::new()),
        };
        Self {
            method: method.into().to_ascii_uppercase(),
            path,
            query_params: query,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.headers
            .insert(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string());
        Ok(self)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// The body as a JSON value; empty or unparsable bodies give `None`
    pub fn body_json(&self) -> Option<JsonValue> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Get a path parameter by name
    pub fn param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn created() -> Self {
        Self::new(201)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.headers
            .insert(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string());
        Ok(self)
    }

    pub fn with_html(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self.headers
            .insert(CONTENT_TYPE.to_string(), TEXT_HTML.to_string());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// JSON error body `{"error": .., "status": ..}` with the error's status
    pub fn from_error(err: &Error) -> Self {
        let status = err.status_code();
        let body = serde_json::json!({
            "error": err.to_string(),
            "status": status,
        });
        HttpResponse::new(status)
            .with_json(&body)
            .unwrap_or_else(|_| HttpResponse::internal_server_error())
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn content_type(&self) -> Option<&String> {
        self.header(CONTENT_TYPE)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What a handler returns; turned into a response by the application
#[derive(Debug, Clone)]
pub enum Reply {
    /// Serialized as JSON
    Value(Value),
    /// Sent as HTML
    Text(String),
    /// Sent as-is
    Response(HttpResponse),
    Empty,
}

impl Reply {
    /// Serialize any `serde` value into a JSON reply
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Reply::Value(Value::from_json(&json)))
    }

    pub fn into_response(self) -> Result<HttpResponse> {
        match self {
            Reply::Value(value) => HttpResponse::ok().with_json(&value),
            Reply::Text(text) => Ok(HttpResponse::ok().with_html(text)),
            Reply::Response(response) => Ok(response),
            Reply::Empty => Ok(HttpResponse::no_content()),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<Entity> for Reply {
    fn from(entity: Entity) -> Self {
        Reply::Value(Value::from(entity))
    }
}

impl From<Option<Entity>> for Reply {
    fn from(entity: Option<Entity>) -> Self {
        Reply::Value(Value::from(entity))
    }
}

impl From<Vec<Entity>> for Reply {
    fn from(entities: Vec<Entity>) -> Self {
        Reply::Value(Value::List(entities.into_iter().map(Value::from).collect()))
    }
}

impl From<JsonValue> for Reply {
    fn from(json: JsonValue) -> Self {
        Reply::Value(Value::from_json(&json))
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<HttpResponse> for Reply {
    fn from(response: HttpResponse) -> Self {
        Reply::Response(response)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

/// Parse a query string into a map of decoded parameters
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let mut split = part.splitn(2, '=');
            let key = decode(split.next()?);
            let value = decode(split.next().unwrap_or(""));
            Some((key, value))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_splits_query() {
        let request = HttpRequest::new("get", "/widgets?limit=5&name=big%20gear&q=a+b");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/widgets");
        assert_eq!(request.query("limit"), Some(&"5".to_string()));
        assert_eq!(request.query("name"), Some(&"big gear".to_string()));
        assert_eq!(request.query("q"), Some(&"a b".to_string()));
    }

    #[test]
    fn test_body_json() {
        let request = HttpRequest::new("POST", "/widgets")
            .with_json(&json!({"Name": "a"}))
            .unwrap();
        assert_eq!(request.body_json(), Some(json!({"Name": "a"})));
        assert_eq!(request.header("content-type"), Some(&APPLICATION_JSON.to_string()));
        assert_eq!(HttpRequest::new("POST", "/").with_body("{oops").body_json(), None);
    }

    #[test]
    fn test_reply_serialization() {
        let entity = Entity::new("app::Entity::Widget").with("Id", 1);
        let response = Reply::from(entity).into_response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some(&APPLICATION_JSON.to_string()));
        assert_eq!(response.body_string(), r#"{"Id":1}"#);

        let response = Reply::from("<p>hi</p>").into_response().unwrap();
        assert_eq!(response.content_type(), Some(&TEXT_HTML.to_string()));
        assert_eq!(response.body_string(), "<p>hi</p>");

        assert_eq!(Reply::Empty.into_response().unwrap().status, 204);
    }

    #[test]
    fn test_error_response() {
        let response = HttpResponse::from_error(&Error::AccessDenied {
            action: "read".into(),
            entity_type: "app::Entity::Widget".into(),
        });
        assert_eq!(response.status, 403);
        let body: JsonValue = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["status"], json!(403));
    }
}
