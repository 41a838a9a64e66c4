// Shared fixtures: a widget entity, its service and controller, and a
// storage stub that records what it was asked to do.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use trellis_core::*;

pub const WIDGET: &str = "app::Entity::Widget";
pub const STORAGE: &str = "app::Storage::Stub";
pub const SERVICE: &str = "app::Service::Widgets";
pub const CONTROLLER: &str = "app::Controller::Widgets";
pub const POLICY: &str = "app::Policy::ReadOnly";
pub const RECORDING_POLICY: &str = "app::Policy::Recording";

#[derive(Default)]
pub struct StubState {
    pub calls: Vec<String>,
    pub rows: Vec<Row>,
    pub inserted: Vec<Row>,
    pub updated: Vec<Row>,
    next_id: i64,
}

/// Clones share state
#[derive(Clone, Default)]
pub struct StubStorage {
    pub state: Arc<Mutex<StubState>>,
}

impl StubStorage {
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(kind))
            .count()
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        let shared = self.clone();
        TypeDescriptor::builder(STORAGE)
            .constructor(Constructor::new(Vec::new(), move |_| Ok(shared.clone())))
            .storage_adapter::<StubStorage>()
            .build()
    }
}

fn matches(row: &Row, conditions: &Conditions) -> bool {
    match conditions {
        Conditions::Fields(fields) => fields
            .iter()
            .all(|(field, condition)| row.get(field) == Some(&condition.value)),
        Conditions::Raw(_) => false,
    }
}

impl StorageAdapter for StubStorage {
    fn select(
        &self,
        collection: &str,
        conditions: &Conditions,
        start: usize,
        limit: usize,
        _order: SortOrder,
        _order_by: &str,
    ) -> std::result::Result<Vec<Row>, StorageError> {
        let mut state = self.state.lock();
        state.calls.push(format!("select:{}", collection));
        Ok(state
            .rows
            .iter()
            .filter(|row| matches(row, conditions))
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    fn insert(&self, collection: &str, fields: &Row) -> std::result::Result<i64, StorageError> {
        let mut state = self.state.lock();
        state.calls.push(format!("insert:{}", collection));
        state.next_id += 1;
        let id = state.next_id;
        state.inserted.push(fields.clone());
        let mut row = fields.clone();
        row.insert(Entity::ID_FIELD.to_string(), JsonValue::from(id));
        state.rows.push(row);
        Ok(id)
    }

    fn update(&self, collection: &str, fields: &Row, conditions: &Conditions) -> std::result::Result<bool, StorageError> {
        let mut state = self.state.lock();
        state.calls.push(format!("update:{}", collection));
        state.updated.push(fields.clone());
        let mut updated = false;
        for row in state.rows.iter_mut().filter(|row| matches(row, conditions)) {
            for (key, value) in fields {
                if key != Entity::ID_FIELD {
                    row.insert(key.clone(), value.clone());
                }
            }
            updated = true;
        }
        Ok(updated)
    }

    fn delete(&self, collection: &str, conditions: &Conditions) -> std::result::Result<bool, StorageError> {
        let mut state = self.state.lock();
        state.calls.push(format!("delete:{}", collection));
        let before = state.rows.len();
        state.rows.retain(|row| !matches(row, conditions));
        Ok(state.rows.len() < before)
    }

    fn create_collection(&self, collection: &str, _columns: &[ColumnSpec]) -> std::result::Result<bool, StorageError> {
        self.state
            .lock()
            .calls
            .push(format!("create_collection:{}", collection));
        Ok(true)
    }

    fn drop_collection(&self, collection: &str) -> std::result::Result<(), StorageError> {
        self.state
            .lock()
            .calls
            .push(format!("drop_collection:{}", collection));
        Ok(())
    }
}

#[derive(Default)]
pub struct WidgetService;

pub struct WidgetController {
    pub widgets: Arc<ServiceHandle>,
}

/// Allows reads only
#[derive(Default)]
pub struct ReadOnly;

impl SecurityPolicy for ReadOnly {
    fn can_read(&self, _: Option<&Entity>, _: &str) -> bool {
        true
    }

    fn can_create(&self, _: Option<&Entity>, _: &str) -> bool {
        false
    }

    fn can_update(&self, _: Option<&Entity>, _: &str) -> bool {
        false
    }

    fn can_delete(&self, _: Option<&Entity>, _: &str) -> bool {
        false
    }
}

/// Allows everything and remembers each check as `(action, record present)`
#[derive(Clone, Default)]
pub struct RecordingPolicy {
    pub checks: Arc<Mutex<Vec<(PolicyAction, bool)>>>,
}

impl RecordingPolicy {
    pub fn descriptor(&self) -> TypeDescriptor {
        let shared = self.clone();
        TypeDescriptor::builder(RECORDING_POLICY)
            .constructor(Constructor::new(Vec::new(), move |_| Ok(shared.clone())))
            .security_policy::<RecordingPolicy>()
            .build()
    }

    fn record(&self, action: PolicyAction, entity: Option<&Entity>) -> bool {
        self.checks.lock().push((action, entity.is_some()));
        true
    }
}

impl SecurityPolicy for RecordingPolicy {
    fn can_read(&self, entity: Option<&Entity>, _: &str) -> bool {
        self.record(PolicyAction::Read, entity)
    }

    fn can_create(&self, entity: Option<&Entity>, _: &str) -> bool {
        self.record(PolicyAction::Create, entity)
    }

    fn can_update(&self, entity: Option<&Entity>, _: &str) -> bool {
        self.record(PolicyAction::Update, entity)
    }

    fn can_delete(&self, entity: Option<&Entity>, _: &str) -> bool {
        self.record(PolicyAction::Delete, entity)
    }
}

pub fn widget() -> TypeDescriptor {
    TypeDescriptor::builder(WIDGET)
        .entity(EntityMarker::default())
        .field(FieldDescriptor::new("Id", FieldType::Int).nullable())
        .field(FieldDescriptor::new("Name", FieldType::String))
        .field(FieldDescriptor::new("Price", FieldType::Float).nullable())
        .field(FieldDescriptor::new("Active", FieldType::Bool))
        .build()
}

pub fn service(policy: Option<&str>) -> TypeDescriptor {
    let builder = TypeDescriptor::builder(SERVICE)
        .service(ServiceMarker::new().entity(WIDGET).storage(STORAGE))
        .default_constructor::<WidgetService>()
        .dynamic();
    match policy {
        Some(provider) => builder.policy(provider).build(),
        None => builder.build(),
    }
}

pub fn controller() -> TypeDescriptor {
    TypeDescriptor::builder(CONTROLLER)
        .controller(ControllerMarker::new("/widgets").service(SERVICE))
        .dynamic()
        .constructor(Constructor::new(
            vec![ParamDescriptor::object("widgets", SERVICE)],
            |args: &Arguments| {
                Ok(WidgetController {
                    widgets: args.service_handle("widgets")?,
                })
            },
        ))
        .method(
            MethodDescriptor::new(
                "count",
                vec![],
                |c: &WidgetController, _: &Arguments| {
                    Ok(Reply::Text(c.widgets.total()?.to_string()))
                },
            )
            .route(RouteMarker::new("GET", "/count").produces("text/plain")),
        )
        .method(
            MethodDescriptor::new(
                "show",
                vec![ParamDescriptor::int("id")],
                |_: &WidgetController, args: &Arguments| Ok(Value::Int(args.int("id")?).into()),
            )
            .route(RouteMarker::new("GET", "/:id")),
        )
        .build()
}

pub fn read_only_policy() -> TypeDescriptor {
    TypeDescriptor::builder(POLICY)
        .default_constructor::<ReadOnly>()
        .security_policy::<ReadOnly>()
        .build()
}

/// Entity, stub storage, service and controller
pub fn catalog(storage: &StubStorage) -> TypeCatalog {
    let catalog = TypeCatalog::new();
    catalog
        .register(widget())
        .register(storage.descriptor())
        .register(service(None))
        .register(controller());
    catalog
}

pub fn resolver(catalog: TypeCatalog, events: EventBus) -> Resolver {
    Resolver::new(catalog, ConfigManager::new(), events)
}

pub fn handle(resolver: &Resolver) -> Arc<ServiceHandle> {
    let service = resolver.singleton(SERVICE).unwrap();
    Arc::clone(service.service_handle().unwrap())
}
