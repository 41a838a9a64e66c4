//! Payload deserializer.
//!
//! Turns loosely typed JSON mappings (request bodies, storage rows) into
//! [`Entity`] records, coercing each declared field to its type and
//! recursing into nested entities.

use crate::catalog::TypeCatalog;
use crate::descriptor::{FieldType, TypeDescriptor};
use crate::error::{Error, Result};
use crate::logging::trace;
use crate::value::{Entity, Value};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use heck::ToSnakeCase;
use serde_json::{Map, Value as JsonValue};

/// Layout used when date/times are written to storage
pub const STORAGE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_DATETIME_FORMATS: [&str; 2] = [STORAGE_DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S"];

#[derive(Clone, Debug)]
pub struct Deserializer {
    catalog: TypeCatalog,
}

impl Deserializer {
    pub fn new(catalog: TypeCatalog) -> Self {
        Self { catalog }
    }

    /// Build an instance of `type_name` from `raw`, which must be a mapping
    pub fn deserialize(&self, type_name: &str, raw: &JsonValue) -> Result<Entity> {
        let descriptor = self.catalog.describe(type_name)?;
        let JsonValue::Object(map) = raw else {
            return Err(Error::MalformedPayload(format!(
                "{} expects a mapping, received {}",
                type_name,
                json_kind(raw)
            )));
        };
        self.populate(&descriptor, map)
    }

    fn populate(&self, descriptor: &TypeDescriptor, map: &Map<String, JsonValue>) -> Result<Entity> {
        trace!(type_name = descriptor.name(), keys = map.len(), "Deserializing payload");

        let mut entity = Entity::new(descriptor.name());
        for field in descriptor.fields() {
            let raw = map
                .get(&field.name)
                .or_else(|| map.get(&field.name.to_snake_case()));

            let value = match (raw, &field.default) {
                (Some(raw), _) => self.coerce(&field.name, &field.ty, field.nullable, raw)?,
                (None, Some(default)) => self.coerce(&field.name, &field.ty, field.nullable, default)?,
                (None, None) => Value::Null,
            };
            entity.set(field.name.clone(), value);
        }
        Ok(entity)
    }

    fn coerce(&self, field: &str, ty: &FieldType, nullable: bool, raw: &JsonValue) -> Result<Value> {
        if raw.is_null() {
            return Ok(if nullable { Value::Null } else { zero_value(ty) });
        }

        match ty {
            FieldType::Int => to_int(field, raw).map(Value::Int),
            FieldType::Float => to_float(field, raw).map(Value::Float),
            FieldType::Bool => Ok(Value::Bool(to_bool(raw))),
            FieldType::String => to_text(field, raw).map(Value::Text),
            FieldType::DateTime => match raw {
                JsonValue::String(text) => parse_datetime(field, text).map(Value::DateTime),
                other => Err(Error::InvalidDateTime {
                    field: field.to_string(),
                    value: other.to_string(),
                }),
            },
            FieldType::List(element) => {
                let JsonValue::Array(items) = raw else {
                    return Err(mismatch(field, "a list", raw));
                };
                items
                    .iter()
                    .map(|item| match element {
                        Some(element) => self.coerce(field, element, true, item),
                        None => Ok(Value::from_json(item)),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)
            }
            FieldType::Map => match raw {
                JsonValue::Object(_) => Ok(Value::from_json(raw)),
                other => Err(mismatch(field, "a mapping", other)),
            },
            FieldType::Mixed => Ok(Value::from_json(raw)),
            FieldType::Entity(type_name) => {
                let descriptor = self.catalog.describe(type_name)?;
                let JsonValue::Object(map) = raw else {
                    return Err(mismatch(field, "a mapping", raw));
                };
                self.populate(&descriptor, map).map(Value::from)
            }
        }
    }
}

/// Value a non-nullable field takes when given null
fn zero_value(ty: &FieldType) -> Value {
    match ty {
        FieldType::Int => Value::Int(0),
        FieldType::Float => Value::Float(0.0),
        FieldType::Bool => Value::Bool(false),
        FieldType::String => Value::Text(String::new()),
        FieldType::List(_) => Value::List(Vec::new()),
        FieldType::Map => Value::Map(Default::default()),
        FieldType::DateTime | FieldType::Mixed | FieldType::Entity(_) => Value::Null,
    }
}

fn to_int(field: &str, raw: &JsonValue) -> Result<i64> {
    match raw {
        JsonValue::Number(n) => Ok(n
            .as_i64()
            .unwrap_or_else(|| n.as_f64().unwrap_or_default() as i64)),
        JsonValue::Bool(b) => Ok(i64::from(*b)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                .map_err(|_| mismatch(field, "an integer", raw))
        }
        other => Err(mismatch(field, "an integer", other)),
    }
}

fn to_float(field: &str, raw: &JsonValue) -> Result<f64> {
    match raw {
        JsonValue::Number(n) => Ok(n.as_f64().unwrap_or_default()),
        JsonValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| mismatch(field, "a number", raw)),
        other => Err(mismatch(field, "a number", other)),
    }
}

fn to_bool(raw: &JsonValue) -> bool {
    match raw {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(_) => true,
    }
}

fn to_text(field: &str, raw: &JsonValue) -> Result<String> {
    match raw {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(mismatch(field, "text", other)),
    }
}

/// Parse RFC 3339, `Y-m-d H:M:S`, `Y-m-dTH:M:S` or a bare date.
/// Values without an offset are taken as UTC.
pub fn parse_datetime(field: &str, text: &str) -> Result<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt);
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    Err(Error::InvalidDateTime {
        field: field.to_string(),
        value: text.to_string(),
    })
}

fn mismatch(field: &str, expected: &str, raw: &JsonValue) -> Error {
    Error::MalformedPayload(format!(
        "field {} expects {}, received {}",
        field,
        expected,
        json_kind(raw)
    ))
}

fn json_kind(raw: &JsonValue) -> &'static str {
    match raw {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EntityMarker, FieldDescriptor};
    use serde_json::json;

    const WIDGET: &str = "app::Entity::Widget";
    const PART: &str = "app::Entity::Part";

    fn catalog() -> TypeCatalog {
        let catalog = TypeCatalog::new();
        catalog
            .register(
                TypeDescriptor::builder(WIDGET)
                    .entity(EntityMarker::default())
                    .field(FieldDescriptor::new("Id", FieldType::Int).nullable())
                    .field(FieldDescriptor::new("Name", FieldType::String))
                    .field(FieldDescriptor::new("Price", FieldType::Float))
                    .field(FieldDescriptor::new("Active", FieldType::Bool).with_default(true))
                    .field(FieldDescriptor::new("CreatedAt", FieldType::DateTime).nullable())
                    .field(FieldDescriptor::new("Tags", FieldType::list_of(FieldType::String)))
                    .field(FieldDescriptor::new("Main", FieldType::Entity(PART.into())).nullable())
                    .build(),
            )
            .register(
                TypeDescriptor::builder(PART)
                    .entity(EntityMarker::default())
                    .field(FieldDescriptor::new("Code", FieldType::String))
                    .build(),
            );
        catalog
    }

    #[test]
    fn test_weak_scalar_coercion() {
        let deserializer = Deserializer::new(catalog());
        let widget = deserializer
            .deserialize(
                WIDGET,
                &json!({"Id": "5", "Name": 12, "Price": "2.50", "Active": 0}),
            )
            .unwrap();

        assert_eq!(widget.get("Id"), Some(&Value::Int(5)));
        assert_eq!(widget.get("Name"), Some(&Value::from("12")));
        assert_eq!(widget.get("Price"), Some(&Value::Float(2.5)));
        assert_eq!(widget.get("Active"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_snake_case_keys_and_defaults() {
        let deserializer = Deserializer::new(catalog());
        let widget = deserializer
            .deserialize(WIDGET, &json!({"name": "gear", "created_at": "2024-05-01"}))
            .unwrap();

        assert_eq!(widget.get("Name"), Some(&Value::from("gear")));
        assert_eq!(widget.get("Active"), Some(&Value::Bool(true)));
        assert!(widget.get("Id").is_some_and(Value::is_null));
        let created = widget.get("CreatedAt").and_then(Value::as_datetime).unwrap();
        assert_eq!(created.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }

    #[test]
    fn test_declared_name_wins_over_snake_form() {
        let deserializer = Deserializer::new(catalog());
        let widget = deserializer
            .deserialize(WIDGET, &json!({"Name": "declared", "name": "snake"}))
            .unwrap();
        assert_eq!(widget.get("Name"), Some(&Value::from("declared")));
    }

    #[test]
    fn test_nested_entities_and_lists() {
        let deserializer = Deserializer::new(catalog());
        let widget = deserializer
            .deserialize(
                WIDGET,
                &json!({"Tags": [1, "two", null], "Main": {"code": "X1"}}),
            )
            .unwrap();

        assert_eq!(
            widget.get("Tags"),
            Some(&Value::List(vec![Value::from("1"), Value::from("two"), Value::Null]))
        );
        let part = widget.get("Main").and_then(Value::as_entity).unwrap();
        assert_eq!(part.type_name(), PART);
        assert_eq!(part.get("Code"), Some(&Value::from("X1")));
    }

    #[test]
    fn test_null_handling() {
        let deserializer = Deserializer::new(catalog());
        let widget = deserializer
            .deserialize(WIDGET, &json!({"Id": null, "Name": null}))
            .unwrap();
        assert!(widget.get("Id").is_some_and(Value::is_null));
        assert_eq!(widget.get("Name"), Some(&Value::from("")));
    }

    #[test]
    fn test_failures() {
        let deserializer = Deserializer::new(catalog());
        assert!(matches!(
            deserializer.deserialize(WIDGET, &json!([1, 2])),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            deserializer.deserialize(WIDGET, &json!({"Price": "cheap"})),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            deserializer.deserialize(WIDGET, &json!({"CreatedAt": "yesterday"})),
            Err(Error::InvalidDateTime { field, .. }) if field == "CreatedAt"
        ));
        assert!(matches!(
            deserializer.deserialize("app::Entity::Missing", &json!({})),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn test_deserialize_is_idempotent() {
        let deserializer = Deserializer::new(catalog());
        let first = deserializer
            .deserialize(
                WIDGET,
                &json!({
                    "Id": 3,
                    "Name": "gear",
                    "Price": 9.5,
                    "CreatedAt": "2024-05-01 10:30:00",
                    "Tags": ["a"],
                    "Main": {"Code": "P"}
                }),
            )
            .unwrap();
        let second = deserializer.deserialize(WIDGET, &first.to_json()).unwrap();
        assert_eq!(first, second);
    }
}
