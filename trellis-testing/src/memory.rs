// In-memory storage adapter that records every call

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;
use trellis_core::{
    ColumnSpec, Condition, Conditions, Constructor, Entity, Row, SortOrder, StorageAdapter,
    StorageError, TypeDescriptor,
};

/// One call made against a [`MemoryStorage`]
#[derive(Debug, Clone, PartialEq)]
pub enum StorageCall {
    Select {
        collection: String,
        conditions: Conditions,
        start: usize,
        limit: usize,
        order: SortOrder,
        order_by: String,
    },
    Insert {
        collection: String,
        fields: Row,
    },
    Update {
        collection: String,
        fields: Row,
        conditions: Conditions,
    },
    Delete {
        collection: String,
        conditions: Conditions,
    },
    CreateCollection {
        collection: String,
        columns: Vec<ColumnSpec>,
    },
    DropCollection {
        collection: String,
    },
}

impl StorageCall {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageCall::Select { .. } => "select",
            StorageCall::Insert { .. } => "insert",
            StorageCall::Update { .. } => "update",
            StorageCall::Delete { .. } => "delete",
            StorageCall::CreateCollection { .. } => "create_collection",
            StorageCall::DropCollection { .. } => "drop_collection",
        }
    }
}

#[derive(Debug, Default)]
struct Collection {
    columns: Vec<ColumnSpec>,
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct MemoryInner {
    collections: RwLock<HashMap<String, Collection>>,
    calls: Mutex<Vec<StorageCall>>,
}

/// Storage adapter over in-process collections.
///
/// Identifiers auto-increment from 1 per collection. Field conditions are
/// AND-combined and support `=`, `!=`, `<>`, `<`, `<=`, `>`, `>=` and
/// `LIKE`; raw filter strings are rejected. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, oldest first
    pub fn calls(&self) -> Vec<StorageCall> {
        self.inner.calls.lock().clone()
    }

    /// Calls of one kind, e.g. `"delete"`
    pub fn calls_to(&self, kind: &str) -> Vec<StorageCall> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| call.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// Current rows of a collection, in insertion order
    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(|c| c.rows.clone())
            .unwrap_or_default()
    }

    pub fn columns(&self, collection: &str) -> Vec<ColumnSpec> {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(|c| c.columns.clone())
            .unwrap_or_default()
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.inner.collections.read().contains_key(collection)
    }

    /// Insert a row without recording a call, creating the collection if
    /// needed. Returns the assigned identifier.
    pub fn seed(&self, collection: &str, row: JsonValue) -> i64 {
        let mut collections = self.inner.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let fields = match row {
            JsonValue::Object(map) => map,
            _ => Row::new(),
        };
        push_row(target, fields)
    }

    /// Descriptor registering this storage under `type_name`. Every
    /// instance the resolver builds shares this storage's state.
    pub fn describe(&self, type_name: &str) -> TypeDescriptor {
        let shared = self.clone();
        TypeDescriptor::builder(type_name)
            .constructor(Constructor::new(Vec::new(), move |_| Ok(shared.clone())))
            .storage_adapter::<MemoryStorage>()
            .build()
    }

    fn record(&self, call: StorageCall) {
        trace!(kind = call.kind(), "Storage call");
        self.inner.calls.lock().push(call);
    }
}

fn push_row(collection: &mut Collection, mut fields: Row) -> i64 {
    collection.next_id += 1;
    let id = collection.next_id;
    fields.insert(Entity::ID_FIELD.to_string(), JsonValue::from(id));
    collection.rows.push(fields);
    id
}

impl StorageAdapter for MemoryStorage {
    fn select(
        &self,
        collection: &str,
        conditions: &Conditions,
        start: usize,
        limit: usize,
        order: SortOrder,
        order_by: &str,
    ) -> Result<Vec<Row>, StorageError> {
        self.record(StorageCall::Select {
            collection: collection.to_string(),
            conditions: conditions.clone(),
            start,
            limit,
            order,
            order_by: order_by.to_string(),
        });

        let collections = self.inner.collections.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;

        let mut rows = Vec::new();
        for row in &target.rows {
            if matches_all(row, conditions)? {
                rows.push(row.clone());
            }
        }

        let sort_key = sort_column(target, order_by);
        rows.sort_by(|a, b| {
            let ordering = compare(
                a.get(&sort_key).unwrap_or(&JsonValue::Null),
                b.get(&sort_key).unwrap_or(&JsonValue::Null),
            )
            .unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(rows.into_iter().skip(start).take(limit).collect())
    }

    fn insert(&self, collection: &str, fields: &Row) -> Result<i64, StorageError> {
        self.record(StorageCall::Insert {
            collection: collection.to_string(),
            fields: fields.clone(),
        });

        let mut collections = self.inner.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;

        for column in target.columns.iter().filter(|c| c.unique && c.name != Entity::ID_FIELD) {
            let Some(value) = fields.get(&column.name).filter(|v| !v.is_null()) else {
                continue;
            };
            if target.rows.iter().any(|row| row.get(&column.name) == Some(value)) {
                return Err(StorageError::Constraint(format!(
                    "duplicate value {} for unique column {}",
                    value, column.name
                )));
            }
        }

        let mut fields = fields.clone();
        fields.remove(Entity::ID_FIELD);
        Ok(push_row(target, fields))
    }

    fn update(&self, collection: &str, fields: &Row, conditions: &Conditions) -> Result<bool, StorageError> {
        self.record(StorageCall::Update {
            collection: collection.to_string(),
            fields: fields.clone(),
            conditions: conditions.clone(),
        });

        let mut collections = self.inner.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;

        let mut updated = false;
        for row in target.rows.iter_mut() {
            if matches_all(row, conditions)? {
                for (key, value) in fields {
                    if key != Entity::ID_FIELD {
                        row.insert(key.clone(), value.clone());
                    }
                }
                updated = true;
            }
        }
        Ok(updated)
    }

    fn delete(&self, collection: &str, conditions: &Conditions) -> Result<bool, StorageError> {
        self.record(StorageCall::Delete {
            collection: collection.to_string(),
            conditions: conditions.clone(),
        });

        let mut collections = self.inner.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;

        let before = target.rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in target.rows.drain(..) {
            if !matches_all(&row, conditions)? {
                kept.push(row);
            }
        }
        target.rows = kept;
        Ok(target.rows.len() < before)
    }

    fn create_collection(&self, collection: &str, columns: &[ColumnSpec]) -> Result<bool, StorageError> {
        self.record(StorageCall::CreateCollection {
            collection: collection.to_string(),
            columns: columns.to_vec(),
        });

        let mut collections = self.inner.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        if target.columns.is_empty() {
            target.columns = columns.to_vec();
        }
        Ok(true)
    }

    fn drop_collection(&self, collection: &str) -> Result<(), StorageError> {
        self.record(StorageCall::DropCollection {
            collection: collection.to_string(),
        });
        self.inner.collections.write().remove(collection);
        Ok(())
    }

    fn total(&self, collection: &str) -> Result<u64, StorageError> {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(|c| c.rows.len() as u64)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))
    }
}

/// `"1"` is the first column, as in SQL `ORDER BY 1`
fn sort_column(collection: &Collection, order_by: &str) -> String {
    match order_by.parse::<usize>() {
        Ok(position) if position >= 1 => collection
            .columns
            .get(position - 1)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| Entity::ID_FIELD.to_string()),
        _ => order_by.to_string(),
    }
}

fn matches_all(row: &Row, conditions: &Conditions) -> Result<bool, StorageError> {
    match conditions {
        Conditions::Raw(raw) => Err(StorageError::UnsupportedCondition(format!(
            "raw filters are not supported in memory: {}",
            raw
        ))),
        Conditions::Fields(fields) => {
            for (field, condition) in fields {
                let value = row.get(field).unwrap_or(&JsonValue::Null);
                if !matches(value, condition)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn matches(value: &JsonValue, condition: &Condition) -> Result<bool, StorageError> {
    let ordering = compare(value, &condition.value);
    let outcome = match condition.operator.to_ascii_uppercase().as_str() {
        "=" | "==" => ordering == Some(Ordering::Equal),
        "!=" | "<>" => ordering != Some(Ordering::Equal),
        "<" => ordering == Some(Ordering::Less),
        "<=" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        ">" => ordering == Some(Ordering::Greater),
        ">=" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        "LIKE" => match (text(value), condition.value.as_str()) {
            (Some(value), Some(pattern)) => like(&value.to_lowercase(), &pattern.to_lowercase()),
            _ => false,
        },
        other => {
            return Err(StorageError::UnsupportedCondition(format!(
                "unknown operator {}",
                other
            )));
        }
    };
    Ok(outcome)
}

/// Numbers (and numeric strings) compare numerically, everything else as text
fn compare(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        (JsonValue::Null, _) => Some(Ordering::Less),
        (_, JsonValue::Null) => Some(Ordering::Greater),
        _ => match (number(left), number(right)) {
            (Some(l), Some(r)) => l.partial_cmp(&r),
            _ => Some(text(left)?.cmp(&text(right)?)),
        },
    }
}

fn number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// SQL LIKE with `%` and `_`
fn like(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_from(&value, &pattern)
}

fn like_from(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => (0..=value.len()).any(|skip| like_from(&value[skip..], rest)),
        Some(('_', rest)) => !value.is_empty() && like_from(&value[1..], rest),
        Some((c, rest)) => value.first() == Some(c) && like_from(&value[1..], rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_core::ColumnType;

    fn storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .create_collection(
                "entity_widget",
                &[
                    ColumnSpec {
                        name: "Id".into(),
                        column_type: ColumnType::Int,
                        nullable: false,
                        default: None,
                        unique: true,
                    },
                    ColumnSpec {
                        name: "Name".into(),
                        column_type: ColumnType::String,
                        nullable: false,
                        default: None,
                        unique: true,
                    },
                ],
            )
            .unwrap();
        storage
    }

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let storage = storage();
        assert_eq!(storage.insert("entity_widget", &row(json!({"Name": "a"}))).unwrap(), 1);
        assert_eq!(storage.insert("entity_widget", &row(json!({"Name": "b"}))).unwrap(), 2);
        assert_eq!(storage.total("entity_widget").unwrap(), 2);
    }

    #[test]
    fn test_unique_columns() {
        let storage = storage();
        storage.insert("entity_widget", &row(json!({"Name": "a"}))).unwrap();
        assert!(matches!(
            storage.insert("entity_widget", &row(json!({"Name": "a"}))),
            Err(StorageError::Constraint(_))
        ));
    }

    #[test]
    fn test_select_filters_orders_and_paginates() {
        let storage = storage();
        for (name, price) in [("gear", 5), ("cog", 12), ("axle", 30), ("bolt", 1)] {
            storage
                .insert("entity_widget", &row(json!({"Name": name, "Price": price})))
                .unwrap();
        }

        let cheap = Conditions::none().and("Price", Condition::new("<", 20));
        let rows = storage
            .select("entity_widget", &cheap, 0, 10, SortOrder::Desc, "Price")
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["Name"].clone()).collect();
        assert_eq!(names, vec![json!("cog"), json!("gear"), json!("bolt")]);

        let page = storage
            .select("entity_widget", &Conditions::none(), 1, 2, SortOrder::Asc, "1")
            .unwrap();
        let ids: Vec<_> = page.iter().map(|r| r["Id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_like() {
        let storage = storage();
        storage.insert("entity_widget", &row(json!({"Name": "Big Gear"}))).unwrap();
        storage.insert("entity_widget", &row(json!({"Name": "cog"}))).unwrap();

        let gears = Conditions::none().and("Name", Condition::new("like", "%gear"));
        let rows = storage
            .select("entity_widget", &gears, 0, 10, SortOrder::Asc, "1")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(like("c_g", "c_g"));
        assert!(!like("cog", "c_"));
    }

    #[test]
    fn test_update_and_delete() {
        let storage = storage();
        let id = storage.insert("entity_widget", &row(json!({"Name": "a"}))).unwrap();

        let by_id = Conditions::by_id(id);
        assert!(storage.update("entity_widget", &row(json!({"Name": "z"})), &by_id).unwrap());
        assert_eq!(storage.rows("entity_widget")[0]["Name"], json!("z"));

        assert!(storage.delete("entity_widget", &by_id).unwrap());
        assert!(!storage.delete("entity_widget", &by_id).unwrap());
        assert_eq!(storage.calls_to("delete").len(), 2);
    }

    #[test]
    fn test_raw_conditions_are_rejected() {
        let storage = storage();
        storage.insert("entity_widget", &row(json!({"Name": "a"}))).unwrap();
        let raw = Conditions::Raw("Name = 'a'".into());
        assert!(matches!(
            storage.select("entity_widget", &raw, 0, 10, SortOrder::Asc, "1"),
            Err(StorageError::UnsupportedCondition(_))
        ));
    }

    #[test]
    fn test_missing_collection() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.select("nope", &Conditions::none(), 0, 1, SortOrder::Asc, "1"),
            Err(StorageError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let storage = storage();
        let clone = storage.clone();
        let id = clone.seed("entity_widget", json!({"Name": "seeded"}));
        assert_eq!(id, 1);
        assert_eq!(storage.rows("entity_widget").len(), 1);
        // Seeding is not a recorded call.
        assert!(storage.calls_to("insert").is_empty());
    }
}
