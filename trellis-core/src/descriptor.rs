//! Type descriptors.
//!
//! A [`TypeDescriptor`] is the explicit registry entry for one discoverable
//! type: the declarative markers it carries, how to construct it, the
//! methods and event listeners it exposes, its entity fields, and the
//! capabilities checked during autowiring. Descriptors are assembled with
//! [`TypeDescriptorBuilder`] and memoized by the catalog.
//!
//! ```
//! use trellis_core::descriptor::*;
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! let descriptor = TypeDescriptor::builder("app::Controller::Greeter")
//!     .controller(ControllerMarker::new("/greet"))
//!     .default_constructor::<Greeter>()
//!     .method(
//!         MethodDescriptor::new("hello", vec![ParamDescriptor::string("name")], |_: &Greeter, args| {
//!             Ok(format!("Hello, {}!", args.string("name")?).into())
//!         })
//!         .route(RouteMarker::new("GET", "/:name")),
//!     )
//!     .build();
//!
//! assert!(descriptor.has_marker(MarkerKind::Controller));
//! ```

use crate::arguments::Arguments;
use crate::error::{Error, Result};
use crate::events::LifecyclePhase;
use crate::http::Reply;
use crate::policy::SecurityPolicy;
use crate::storage::{ColumnType, StorageAdapter};
use crate::value::Entity;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A constructed object of any discoverable type
pub type Instance = Arc<dyn Any + Send + Sync>;

pub type BuildFn = Arc<dyn Fn(&Arguments) -> Result<Instance> + Send + Sync>;
pub type InvokeFn = Arc<dyn Fn(&Instance, &Arguments) -> Result<Reply> + Send + Sync>;
pub type ListenerFn =
    Arc<dyn Fn(&Instance, &Entity, Option<&Entity>) -> Result<Option<Entity>> + Send + Sync>;
pub type StorageCaster = Arc<dyn Fn(Instance) -> Option<Arc<dyn StorageAdapter>> + Send + Sync>;
pub type PolicyCaster = Arc<dyn Fn(Instance) -> Option<Arc<dyn SecurityPolicy>> + Send + Sync>;

/// Kinds of type-level markers, used by `TypeCatalog::find_by_marker`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Controller,
    Service,
    Entity,
    EntityPolicy,
    CliController,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerMarker {
    pub base_url: String,
    pub service: Option<String>,
}

impl ControllerMarker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            service: None,
        }
    }

    /// Associate a service; its CRUD operations become controller delegators
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMarker {
    pub entity: Option<String>,
    pub storage: Option<String>,
}

impl ServiceMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = Some(storage.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMarker {
    pub storage_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPolicyMarker {
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliControllerMarker {
    pub base_action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMarker {
    pub method: String,
    pub path: String,
    pub produces: Option<String>,
    pub consumes: Option<String>,
}

impl RouteMarker {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            produces: None,
            consumes: None,
        }
    }

    pub fn produces(mut self, mime: impl Into<String>) -> Self {
        self.produces = Some(mime.into());
        self
    }

    pub fn consumes(mut self, mime: impl Into<String>) -> Self {
        self.consumes = Some(mime.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliMethodMarker {
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventListenerMarker {
    pub entity: String,
    pub phase: LifecyclePhase,
}

/// Primitive parameter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    Bool,
    String,
    Array,
    /// Untyped, passed through as-is
    Mixed,
}

/// Declared type of a constructor or method parameter.
///
/// Framework types are distinguished here, once, when the descriptor is
/// built. Everything else is either another discoverable type or a scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Config,
    Catalog,
    Resolver,
    EventBus,
    Object(String),
    Scalar(ScalarKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    pub name: String,
    pub ty: ParamType,
    pub nullable: bool,
    pub optional: bool,
    default: Option<JsonValue>,
}

impl ParamDescriptor {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            optional: false,
            default: None,
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Scalar(ScalarKind::Int))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Scalar(ScalarKind::Float))
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Scalar(ScalarKind::Bool))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Scalar(ScalarKind::String))
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Scalar(ScalarKind::Array))
    }

    pub fn mixed(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Scalar(ScalarKind::Mixed))
    }

    pub fn object(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object(type_name.into()))
    }

    pub fn config(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Config)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Declare a default. Falsy defaults (`0`, `""`, `false`) count.
    pub fn with_default(mut self, value: impl Into<JsonValue>) -> Self {
        self.default = Some(value.into());
        self.optional = true;
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn default(&self) -> Option<&JsonValue> {
        self.default.as_ref()
    }
}

/// Declared type of an entity field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Bool,
    String,
    DateTime,
    /// Collection, optionally with a typed element
    List(Option<Box<FieldType>>),
    Map,
    Mixed,
    Entity(String),
}

impl FieldType {
    pub fn list_of(element: FieldType) -> Self {
        FieldType::List(Some(Box::new(element)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub unique: bool,
    pub long_text: bool,
    pub default: Option<JsonValue>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            unique: false,
            long_text: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn long_text(mut self) -> Self {
        self.long_text = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<JsonValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Storage column type for this field
    pub fn column_type(&self) -> ColumnType {
        match &self.ty {
            FieldType::Int => ColumnType::Int,
            FieldType::Float => ColumnType::Float,
            FieldType::Bool => ColumnType::Bool,
            FieldType::String if self.long_text => ColumnType::Text,
            FieldType::String => ColumnType::String,
            FieldType::DateTime => ColumnType::DateTime,
            FieldType::List(_) | FieldType::Map | FieldType::Mixed | FieldType::Entity(_) => {
                ColumnType::Json
            }
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(
            self.ty,
            FieldType::List(_) | FieldType::Map | FieldType::Mixed | FieldType::Entity(_)
        )
    }
}

#[derive(Clone)]
pub struct Constructor {
    pub params: Vec<ParamDescriptor>,
    build: BuildFn,
}

impl Constructor {
    pub fn new<T, F>(params: Vec<ParamDescriptor>, build: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Arguments) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            params,
            build: Arc::new(move |args: &Arguments| Ok(Arc::new(build(args)?) as Instance)),
        }
    }

    /// Zero-parameter construction through `Default`
    pub fn default_of<T: Any + Default + Send + Sync>() -> Self {
        Self::new(Vec::new(), |_| Ok(T::default()))
    }

    pub fn is_parameterless(&self) -> bool {
        self.params.is_empty()
    }

    pub fn build(&self, args: &Arguments) -> Result<Instance> {
        (self.build)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<ParamDescriptor>,
    pub route: Option<RouteMarker>,
    pub cli: Option<CliMethodMarker>,
    invoke: InvokeFn,
}

impl MethodDescriptor {
    pub fn new<T, F>(name: impl Into<String>, params: Vec<ParamDescriptor>, method: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Arguments) -> Result<Reply> + Send + Sync + 'static,
    {
        let name = name.into();
        let method_name = name.clone();
        Self {
            name,
            params,
            route: None,
            cli: None,
            invoke: Arc::new(move |instance: &Instance, args: &Arguments| {
                let target = instance.downcast_ref::<T>().ok_or_else(|| {
                    Error::Internal(format!(
                        "method {} invoked on an instance of the wrong type",
                        method_name
                    ))
                })?;
                method(target, args)
            }),
        }
    }

    pub fn route(mut self, route: RouteMarker) -> Self {
        self.route = Some(route);
        self
    }

    pub fn cli(mut self, action: impl Into<String>) -> Self {
        self.cli = Some(CliMethodMarker {
            action: action.into(),
        });
        self
    }

    pub fn invoke(&self, instance: &Instance, args: &Arguments) -> Result<Reply> {
        (self.invoke)(instance, args)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("route", &self.route)
            .field("cli", &self.cli)
            .finish_non_exhaustive()
    }
}

/// A method subscribed to an entity lifecycle phase
#[derive(Clone)]
pub struct ListenerDescriptor {
    pub method: String,
    pub marker: EventListenerMarker,
    call: ListenerFn,
}

impl ListenerDescriptor {
    pub fn new<T, F>(
        method: impl Into<String>,
        entity: impl Into<String>,
        phase: LifecyclePhase,
        listener: F,
    ) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Entity, Option<&Entity>) -> Result<Option<Entity>> + Send + Sync + 'static,
    {
        let method = method.into();
        let method_name = method.clone();
        Self {
            method,
            marker: EventListenerMarker {
                entity: entity.into(),
                phase,
            },
            call: Arc::new(
                move |instance: &Instance, entity: &Entity, original: Option<&Entity>| {
                    let target = instance.downcast_ref::<T>().ok_or_else(|| {
                        Error::Internal(format!(
                            "listener {} invoked on an instance of the wrong type",
                            method_name
                        ))
                    })?;
                    listener(target, entity, original)
                },
            ),
        }
    }

    pub fn call(
        &self,
        instance: &Instance,
        entity: &Entity,
        original: Option<&Entity>,
    ) -> Result<Option<Entity>> {
        (self.call)(instance, entity, original)
    }
}

impl fmt::Debug for ListenerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerDescriptor")
            .field("method", &self.method)
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

/// Introspection record for one discoverable type
pub struct TypeDescriptor {
    name: String,
    controller: Option<ControllerMarker>,
    service: Option<ServiceMarker>,
    entity: Option<EntityMarker>,
    policy: Option<EntityPolicyMarker>,
    cli_controller: Option<CliControllerMarker>,
    constructor: Option<Constructor>,
    methods: IndexMap<String, MethodDescriptor>,
    listeners: Vec<ListenerDescriptor>,
    fields: Vec<FieldDescriptor>,
    dynamic: bool,
    storage_caster: Option<StorageCaster>,
    policy_caster: Option<PolicyCaster>,
}

impl TypeDescriptor {
    pub fn builder(name: impl Into<String>) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_marker(&self, kind: MarkerKind) -> bool {
        match kind {
            MarkerKind::Controller => self.controller.is_some(),
            MarkerKind::Service => self.service.is_some(),
            MarkerKind::Entity => self.entity.is_some(),
            MarkerKind::EntityPolicy => self.policy.is_some(),
            MarkerKind::CliController => self.cli_controller.is_some(),
        }
    }

    pub fn controller(&self) -> Option<&ControllerMarker> {
        self.controller.as_ref()
    }

    pub fn service(&self) -> Option<&ServiceMarker> {
        self.service.as_ref()
    }

    pub fn entity(&self) -> Option<&EntityMarker> {
        self.entity.as_ref()
    }

    pub fn policy(&self) -> Option<&EntityPolicyMarker> {
        self.policy.as_ref()
    }

    pub fn cli_controller(&self) -> Option<&CliControllerMarker> {
        self.cli_controller.as_ref()
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    /// Methods in declaration order
    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    pub fn listeners(&self) -> &[ListenerDescriptor] {
        &self.listeners
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the type can carry synthesized methods
    pub fn supports_dynamic_methods(&self) -> bool {
        self.dynamic
    }

    pub fn implements_storage(&self) -> bool {
        self.storage_caster.is_some()
    }

    pub fn implements_policy(&self) -> bool {
        self.policy_caster.is_some()
    }

    /// View an instance of this type through the storage contract
    pub fn as_storage(&self, instance: Instance) -> Option<Arc<dyn StorageAdapter>> {
        self.storage_caster.as_ref().and_then(|cast| cast(instance))
    }

    /// View an instance of this type through the security policy contract
    pub fn as_policy(&self, instance: Instance) -> Option<Arc<dyn SecurityPolicy>> {
        self.policy_caster.as_ref().and_then(|cast| cast(instance))
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("controller", &self.controller)
            .field("service", &self.service)
            .field("entity", &self.entity)
            .field("policy", &self.policy)
            .field("cli_controller", &self.cli_controller)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .field("fields", &self.fields.len())
            .field("dynamic", &self.dynamic)
            .finish()
    }
}

pub struct TypeDescriptorBuilder {
    descriptor: TypeDescriptor,
}

impl TypeDescriptorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: TypeDescriptor {
                name: name.into(),
                controller: None,
                service: None,
                entity: None,
                policy: None,
                cli_controller: None,
                constructor: None,
                methods: IndexMap::new(),
                listeners: Vec::new(),
                fields: Vec::new(),
                dynamic: false,
                storage_caster: None,
                policy_caster: None,
            },
        }
    }

    pub fn controller(mut self, marker: ControllerMarker) -> Self {
        self.descriptor.controller = Some(marker);
        self
    }

    pub fn service(mut self, marker: ServiceMarker) -> Self {
        self.descriptor.service = Some(marker);
        self
    }

    pub fn entity(mut self, marker: EntityMarker) -> Self {
        self.descriptor.entity = Some(marker);
        self
    }

    pub fn policy(mut self, provider: impl Into<String>) -> Self {
        self.descriptor.policy = Some(EntityPolicyMarker {
            provider: provider.into(),
        });
        self
    }

    pub fn cli_controller(mut self, base_action: impl Into<String>) -> Self {
        self.descriptor.cli_controller = Some(CliControllerMarker {
            base_action: base_action.into(),
        });
        self
    }

    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.descriptor.constructor = Some(constructor);
        self
    }

    pub fn default_constructor<T: Any + Default + Send + Sync>(self) -> Self {
        self.constructor(Constructor::default_of::<T>())
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.descriptor.methods.insert(method.name.clone(), method);
        self
    }

    pub fn listener(mut self, listener: ListenerDescriptor) -> Self {
        self.descriptor.listeners.push(listener);
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.descriptor.fields.push(field);
        self
    }

    /// Allow synthesized CRUD methods on this type
    pub fn dynamic(mut self) -> Self {
        self.descriptor.dynamic = true;
        self
    }

    /// Declare that instances implement the storage contract
    pub fn storage_adapter<T: StorageAdapter + Any>(mut self) -> Self {
        self.descriptor.storage_caster = Some(Arc::new(|instance: Instance| {
            instance
                .downcast::<T>()
                .ok()
                .map(|adapter| adapter as Arc<dyn StorageAdapter>)
        }));
        self
    }

    /// Declare that instances implement the security policy contract
    pub fn security_policy<T: SecurityPolicy + Any>(mut self) -> Self {
        self.descriptor.policy_caster = Some(Arc::new(|instance: Instance| {
            instance
                .downcast::<T>()
                .ok()
                .map(|policy| policy as Arc<dyn SecurityPolicy>)
        }));
        self
    }

    pub fn build(self) -> TypeDescriptor {
        self.descriptor
    }
}
