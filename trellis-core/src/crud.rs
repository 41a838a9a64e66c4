//! Synthesized CRUD operations.
//!
//! A service that declares an entity and a storage adapter gets a
//! [`ServiceHandle`] during autowiring. The handle is held next to the
//! service instance, never merged into it. Controllers that declare such a
//! service get a [`ControllerCrud`] exposing the five operations as
//! invocable delegators.

use crate::arguments::Arguments;
use crate::descriptor::{ParamDescriptor, TypeDescriptor};
use crate::deserializer::{Deserializer, STORAGE_DATETIME_FORMAT};
use crate::error::{Error, Result};
use crate::events::{EventBus, LifecyclePhase};
use crate::http::{HttpResponse, Reply};
use crate::logging::{debug, trace};
use crate::policy::PolicyAction;
use crate::resolver::WeakResolver;
use crate::storage::{ColumnSpec, ColumnType, Conditions, Row, SortOrder, StorageAdapter};
use crate::value::{Entity, Value};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::fmt;
use std::sync::Arc;

const APP_PREFIX: &str = "app::";

/// Storage collection for an entity type.
///
/// `app::Entity::Widget` becomes `entity_widget`.
pub fn collection_name(entity_type: &str) -> String {
    let stripped = match entity_type.get(..APP_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(APP_PREFIX) => &entity_type[APP_PREFIX.len()..],
        _ => entity_type,
    };
    stripped
        .replace("::Entity::", "_")
        .replace("::Service::", "_")
        .replace("::", "_")
        .to_lowercase()
}

/// Input to `create`/`update`: an entity or a raw mapping to deserialize
#[derive(Debug, Clone)]
pub enum EntityInput {
    Entity(Entity),
    Raw(JsonValue),
}

impl From<Entity> for EntityInput {
    fn from(entity: Entity) -> Self {
        EntityInput::Entity(entity)
    }
}

impl From<JsonValue> for EntityInput {
    fn from(raw: JsonValue) -> Self {
        EntityInput::Raw(raw)
    }
}

/// Entity operations bound to one service, its entity type and its adapter
pub struct ServiceHandle {
    service: String,
    entity: Arc<TypeDescriptor>,
    collection: String,
    adapter: Arc<dyn StorageAdapter>,
    policy: Option<String>,
    deserializer: Deserializer,
    events: EventBus,
    resolver: WeakResolver,
}

impl ServiceHandle {
    pub fn new(
        service: impl Into<String>,
        entity: Arc<TypeDescriptor>,
        adapter: Arc<dyn StorageAdapter>,
        policy: Option<String>,
        deserializer: Deserializer,
        events: EventBus,
        resolver: WeakResolver,
    ) -> Self {
        let collection = collection_name(entity.name());
        Self {
            service: service.into(),
            entity,
            collection,
            adapter,
            policy,
            deserializer,
            events,
            resolver,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn entity_type(&self) -> &str {
        self.entity.name()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Columns for the backing collection, identifier first
    pub fn columns(&self) -> Vec<ColumnSpec> {
        let mut columns = vec![ColumnSpec {
            name: Entity::ID_FIELD.to_string(),
            column_type: ColumnType::Int,
            nullable: false,
            default: None,
            unique: true,
        }];
        columns.extend(
            self.entity
                .fields()
                .iter()
                .filter(|field| field.name != Entity::ID_FIELD)
                .map(|field| ColumnSpec {
                    name: field.name.clone(),
                    column_type: field.column_type(),
                    nullable: field.nullable,
                    default: field.default.clone(),
                    unique: field.unique,
                }),
        );
        columns
    }

    /// Ensure the backing collection exists
    pub fn init(&self) -> Result<bool> {
        let columns = self.columns();
        debug!(
            collection = %self.collection,
            columns = columns.len(),
            "Ensuring storage collection"
        );
        Ok(self.adapter.create_collection(&self.collection, &columns)?)
    }

    /// Run the declared policy provider's check for `action`.
    ///
    /// Services without a provider allow everything.
    pub fn check_policy(&self, action: PolicyAction, entity: Option<&Entity>) -> Result<()> {
        let Some(provider) = &self.policy else {
            return Ok(());
        };

        let resolver = self.resolver.upgrade().ok_or_else(|| {
            Error::Internal(format!("resolver for service {} was dropped", self.service))
        })?;
        let contract_error = || Error::InvalidPolicyContract {
            service: self.service.clone(),
            policy: provider.clone(),
        };
        let descriptor = resolver.catalog().describe(provider)?;
        if !descriptor.implements_policy() {
            return Err(contract_error());
        }
        let managed = resolver.singleton(provider)?;
        let policy = descriptor
            .as_policy(Arc::clone(managed.instance()))
            .ok_or_else(contract_error)?;

        let allowed = action.check(policy.as_ref(), entity, self.entity.name());
        trace!(
            entity_type = self.entity.name(),
            action = %action,
            allowed,
            "Policy check"
        );
        if allowed {
            Ok(())
        } else {
            Err(Error::AccessDenied {
                action: action.to_string(),
                entity_type: self.entity.name().to_string(),
            })
        }
    }

    /// Load one record by identifier
    pub fn one(&self, id: i64) -> Result<Option<Entity>> {
        let rows = self.adapter.select(
            &self.collection,
            &Conditions::by_id(id),
            0,
            1,
            SortOrder::Asc,
            Entity::ID_FIELD,
        )?;
        let entity = rows
            .into_iter()
            .next()
            .map(|row| self.from_row(row))
            .transpose()?;
        self.check_policy(PolicyAction::Read, entity.as_ref())?;
        debug!(collection = %self.collection, id, found = entity.is_some(), "Loaded entity");
        Ok(entity)
    }

    pub fn list(
        &self,
        conditions: &Conditions,
        start: usize,
        limit: usize,
        order: SortOrder,
        order_by: &str,
    ) -> Result<Vec<Entity>> {
        self.check_policy(PolicyAction::Read, None)?;
        let rows = self
            .adapter
            .select(&self.collection, conditions, start, limit, order, order_by)?;
        debug!(collection = %self.collection, rows = rows.len(), "Listed entities");
        rows.into_iter().map(|row| self.from_row(row)).collect()
    }

    pub fn create(&self, input: impl Into<EntityInput>) -> Result<Entity> {
        let entity = self.materialize(input.into())?;
        self.check_policy(PolicyAction::Create, Some(&entity))?;
        let mut entity = self
            .events
            .dispatch(LifecyclePhase::BeforeCreate, entity, None)
            .and_then(|entity| self.own_type(entity))?;

        let row: Row = self
            .entity
            .fields()
            .iter()
            .filter_map(|field| {
                let value = entity.get(&field.name).filter(|value| !value.is_null())?;
                Some((field.name.clone(), storage_value(value)))
            })
            .collect();
        let id = self.adapter.insert(&self.collection, &row)?;
        entity.set_id(id);
        debug!(collection = %self.collection, id, "Created entity");

        self.events
            .dispatch(LifecyclePhase::AfterCreate, entity, None)
    }

    /// Write every declared field of an existing record
    pub fn update(&self, input: impl Into<EntityInput>) -> Result<Entity> {
        let entity = self.materialize(input.into())?;
        let id = entity.id().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cannot update {} without an {}",
                self.entity.name(),
                Entity::ID_FIELD
            ))
        })?;

        let original = self.one(id)?;
        self.check_policy(PolicyAction::Update, original.as_ref())?;
        let entity = self
            .events
            .dispatch(LifecyclePhase::BeforeUpdate, entity, original.as_ref())
            .and_then(|entity| self.own_type(entity))?;

        let row: Row = self
            .entity
            .fields()
            .iter()
            .map(|field| {
                let value = entity.get(&field.name).unwrap_or(&Value::Null);
                (field.name.clone(), storage_value(value))
            })
            .collect();
        self.adapter
            .update(&self.collection, &row, &Conditions::by_id(id))?;
        debug!(collection = %self.collection, id, "Updated entity");

        self.events
            .dispatch(LifecyclePhase::AfterUpdate, entity, original.as_ref())
    }

    /// Delete by identifier.
    ///
    /// Delete events only fire for records that were found, but the storage
    /// delete is issued either way.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let loaded = self.one(id)?;
        self.check_policy(PolicyAction::Delete, loaded.as_ref())?;
        let loaded = loaded
            .map(|entity| self.events.dispatch(LifecyclePhase::BeforeDelete, entity, None))
            .transpose()?;

        let deleted = self.adapter.delete(&self.collection, &Conditions::by_id(id))?;
        debug!(collection = %self.collection, id, deleted, "Deleted entity");

        if let Some(entity) = loaded {
            self.events
                .dispatch(LifecyclePhase::AfterDelete, entity, None)?;
        }
        Ok(deleted)
    }

    /// Number of records in the collection
    pub fn total(&self) -> Result<u64> {
        Ok(self.adapter.total(&self.collection)?)
    }

    fn materialize(&self, input: EntityInput) -> Result<Entity> {
        match input {
            EntityInput::Entity(entity) => self.own_type(entity),
            EntityInput::Raw(raw) => self.deserializer.deserialize(self.entity.name(), &raw),
        }
    }

    /// Entities of another type never reach this service's collection
    fn own_type(&self, entity: Entity) -> Result<Entity> {
        if entity.type_name() == self.entity.name() {
            Ok(entity)
        } else {
            Err(Error::MalformedPayload(format!(
                "service {} manages {}, received {}",
                self.service,
                self.entity.name(),
                entity.type_name()
            )))
        }
    }

    fn from_row(&self, row: Row) -> Result<Entity> {
        self.deserializer
            .deserialize(self.entity.name(), &JsonValue::Object(row))
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &self.service)
            .field("entity", &self.entity.name())
            .field("collection", &self.collection)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// How a field value is written to storage
fn storage_value(value: &Value) -> JsonValue {
    match value {
        Value::Bool(b) => JsonValue::from(i64::from(*b)),
        Value::DateTime(dt) => JsonValue::String(dt.format(STORAGE_DATETIME_FORMAT).to_string()),
        other => other.to_json(),
    }
}

/// Controller-facing delegators for a service's CRUD operations
pub struct ControllerCrud {
    handle: Arc<ServiceHandle>,
    params: IndexMap<&'static str, Vec<ParamDescriptor>>,
}

impl ControllerCrud {
    pub const METHODS: [&'static str; 5] = ["one", "list", "create", "update", "delete"];

    pub fn new(handle: Arc<ServiceHandle>) -> Self {
        let mut params = IndexMap::new();
        params.insert("one", vec![ParamDescriptor::int("id")]);
        params.insert(
            "list",
            vec![
                ParamDescriptor::array("where").with_default(json!([])),
                ParamDescriptor::int("start").with_default(0),
                ParamDescriptor::int("limit").with_default(20),
                ParamDescriptor::string("order").with_default("ASC"),
                ParamDescriptor::string("orderBy").with_default("1"),
            ],
        );
        params.insert("create", vec![ParamDescriptor::mixed("entity")]);
        params.insert(
            "update",
            vec![
                ParamDescriptor::mixed("entity"),
                ParamDescriptor::int("id").nullable(),
            ],
        );
        params.insert("delete", vec![ParamDescriptor::int("id")]);
        Self { handle, params }
    }

    pub fn has(&self, method: &str) -> bool {
        self.params.contains_key(method)
    }

    pub fn params(&self, method: &str) -> Option<&[ParamDescriptor]> {
        self.params.get(method).map(Vec::as_slice)
    }

    pub fn service(&self) -> &Arc<ServiceHandle> {
        &self.handle
    }

    /// Run a delegator with resolved arguments
    pub fn call(&self, method: &str, args: &Arguments) -> Result<Reply> {
        match method {
            "one" => respond(&self.handle.one(args.int("id")?)?),
            "list" => {
                let conditions = match args.value("where")? {
                    Some(raw) => Conditions::from_json(raw)?,
                    None => Conditions::none(),
                };
                let entities = self.handle.list(
                    &conditions,
                    non_negative(args, "start")?,
                    non_negative(args, "limit")?,
                    args.string("order")?.parse()?,
                    &args.string("orderBy")?,
                )?;
                respond(&entities)
            }
            "create" => respond(&self.handle.create(entity_payload(args)?)?),
            "update" => {
                let mut raw = entity_payload(args)?;
                if let (JsonValue::Object(map), Some(id)) = (&mut raw, args.optional::<i64>("id")?)
                {
                    // A path identifier fills in a payload without one.
                    if map.get(Entity::ID_FIELD).is_none_or(JsonValue::is_null) {
                        map.insert(Entity::ID_FIELD.to_string(), JsonValue::from(id));
                    }
                }
                respond(&self.handle.update(raw)?)
            }
            "delete" => respond(&self.handle.delete(args.int("id")?)?),
            _ => Err(Error::MethodNotFound {
                type_name: self.handle.service().to_string(),
                method: method.to_string(),
            }),
        }
    }
}

impl fmt::Debug for ControllerCrud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerCrud")
            .field("service", &self.handle.service())
            .field("methods", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn respond<T: Serialize>(body: &T) -> Result<Reply> {
    Ok(Reply::Response(HttpResponse::ok().with_json(body)?))
}

fn entity_payload(args: &Arguments) -> Result<JsonValue> {
    Ok(args.value("entity")?.cloned().unwrap_or(JsonValue::Null))
}

fn non_negative(args: &Arguments, name: &str) -> Result<usize> {
    let value = args.int(name)?;
    usize::try_from(value)
        .map_err(|_| Error::InvalidArgument(format!("{} must not be negative, received {}", name, value)))
}
