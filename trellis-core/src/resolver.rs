//! Dependency resolver.
//!
//! Builds instances of discoverable types, resolving constructor and method
//! parameters by declared type, by name against a [`RequestContext`], or by
//! declared default. Services are cached per resolver: the first resolution
//! wins and every later lookup returns the same instance. Autowiring runs
//! once, right after construction, and attaches a [`ServiceHandle`] to
//! services that declare an entity and a storage adapter, and
//! [`ControllerCrud`] delegators to controllers that declare such a service.

use crate::arguments::{Argument, Arguments};
use crate::catalog::TypeCatalog;
use crate::context::RequestContext;
use crate::crud::{ControllerCrud, ServiceHandle};
use crate::descriptor::{
    Instance, MarkerKind, ParamDescriptor, ParamType, ScalarKind, TypeDescriptor,
};
use crate::deserializer::Deserializer;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::http::Reply;
use crate::logging::{debug, trace, warn};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use trellis_config::ConfigManager;

/// A constructed instance together with what autowiring attached to it
#[derive(Clone)]
pub struct Managed {
    descriptor: Arc<TypeDescriptor>,
    instance: Instance,
    crud: Option<Arc<ServiceHandle>>,
    delegates: Option<Arc<ControllerCrud>>,
}

impl Managed {
    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }

    /// Synthesized entity operations of a service
    pub fn service_handle(&self) -> Option<&Arc<ServiceHandle>> {
        self.crud.as_ref()
    }

    /// CRUD delegators of a controller
    pub fn controller_crud(&self) -> Option<&Arc<ControllerCrud>> {
        self.delegates.as_ref()
    }
}

impl fmt::Debug for Managed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("type_name", &self.type_name())
            .field("service_handle", &self.crud.is_some())
            .field("controller_crud", &self.delegates.is_some())
            .finish()
    }
}

struct ResolverInner {
    catalog: TypeCatalog,
    config: ConfigManager,
    events: EventBus,
    deserializer: Deserializer,
    services: RwLock<HashMap<String, Managed>>,
}

/// Clonable handle to one resolver and its singleton cache
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

/// Non-owning handle held by synthesized operations and event handlers
#[derive(Clone)]
pub struct WeakResolver {
    inner: Weak<ResolverInner>,
}

impl WeakResolver {
    pub fn upgrade(&self) -> Option<Resolver> {
        self.inner.upgrade().map(|inner| Resolver { inner })
    }
}

/// Types currently being constructed, outermost first
type ResolutionPath = Vec<String>;

impl Resolver {
    pub fn new(catalog: TypeCatalog, config: ConfigManager, events: EventBus) -> Self {
        let deserializer = Deserializer::new(catalog.clone());
        Self {
            inner: Arc::new(ResolverInner {
                catalog,
                config,
                events,
                deserializer,
                services: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakResolver {
        WeakResolver {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.inner.catalog
    }

    pub fn config(&self) -> &ConfigManager {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn deserializer(&self) -> &Deserializer {
        &self.inner.deserializer
    }

    /// Whether `type_name` is in the singleton cache
    pub fn is_cached(&self, type_name: &str) -> bool {
        self.inner.services.read().contains_key(type_name)
    }

    /// Build (or fetch from the cache) an instance of `type_name`.
    ///
    /// `role` only labels the resolution in logs.
    pub fn instantiate(
        &self,
        type_name: &str,
        role: Option<MarkerKind>,
        ctx: &RequestContext,
    ) -> Result<Managed> {
        let mut path = ResolutionPath::new();
        self.instantiate_in(type_name, role, ctx, &mut path)
    }

    /// The cached instance of `type_name`, constructing it on first use
    pub fn singleton(&self, type_name: &str) -> Result<Managed> {
        let mut path = ResolutionPath::new();
        self.singleton_in(type_name, &mut path)
    }

    /// Resolve `params` in declaration order
    pub fn resolve_parameters(
        &self,
        params: &[ParamDescriptor],
        method: &str,
        ctx: &RequestContext,
    ) -> Result<Arguments> {
        let mut path = ResolutionPath::new();
        self.resolve_in(params, method, ctx, &mut path)
    }

    /// Resolve a method's parameters against `ctx` and call it.
    ///
    /// Concrete methods win; controller CRUD delegators are reachable by
    /// name otherwise.
    pub fn invoke(&self, managed: &Managed, method: &str, ctx: &RequestContext) -> Result<Reply> {
        if let Some(descriptor) = managed.descriptor.method(method) {
            trace!(type_name = managed.type_name(), method, "Invoking method");
            let args = self.resolve_parameters(&descriptor.params, method, ctx)?;
            return descriptor.invoke(&managed.instance, &args);
        }

        if let Some(delegates) = &managed.delegates {
            if let Some(params) = delegates.params(method) {
                trace!(type_name = managed.type_name(), method, "Invoking CRUD delegator");
                let args = self.resolve_parameters(params, method, ctx)?;
                return delegates.call(method, &args);
            }
        }

        Err(Error::MethodNotFound {
            type_name: managed.type_name().to_string(),
            method: method.to_string(),
        })
    }

    fn cached(&self, type_name: &str) -> Option<Managed> {
        self.inner.services.read().get(type_name).cloned()
    }

    /// Insert unless another resolution got there first; returns the winner
    fn cache(&self, managed: Managed) -> Managed {
        let mut services = self.inner.services.write();
        services
            .entry(managed.type_name().to_string())
            .or_insert(managed)
            .clone()
    }

    fn singleton_in(&self, type_name: &str, path: &mut ResolutionPath) -> Result<Managed> {
        if let Some(managed) = self.cached(type_name) {
            trace!(type_name, "Singleton cache hit");
            return Ok(managed);
        }
        let managed = self.instantiate_in(type_name, None, &RequestContext::new(), path)?;
        Ok(self.cache(managed))
    }

    fn enter(&self, type_name: &str, path: &mut ResolutionPath) -> Result<()> {
        if path.iter().any(|entry| entry == type_name) {
            let mut chain = path.clone();
            chain.push(type_name.to_string());
            return Err(Error::CircularDependency(chain.join(" -> ")));
        }
        path.push(type_name.to_string());
        Ok(())
    }

    fn instantiate_in(
        &self,
        type_name: &str,
        role: Option<MarkerKind>,
        ctx: &RequestContext,
        path: &mut ResolutionPath,
    ) -> Result<Managed> {
        if let Some(managed) = self.cached(type_name) {
            trace!(type_name, "Service cache hit");
            return Ok(managed);
        }

        let descriptor = self.inner.catalog.describe(type_name)?;
        self.enter(type_name, path)?;
        let built = self.construct(&descriptor, role, ctx, path);
        path.pop();
        let managed = built?;

        if descriptor.has_marker(MarkerKind::Service) {
            Ok(self.cache(managed))
        } else {
            Ok(managed)
        }
    }

    fn construct(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        role: Option<MarkerKind>,
        ctx: &RequestContext,
        path: &mut ResolutionPath,
    ) -> Result<Managed> {
        let type_name = descriptor.name();
        debug!(type_name, role = ?role, "Instantiating");

        let constructor = descriptor.constructor().ok_or_else(|| {
            Error::InvalidArgument(format!("type {} declares no constructor", type_name))
        })?;
        let args = self.resolve_in(&constructor.params, &format!("{}::new", type_name), ctx, path)?;
        let instance = constructor.build(&args)?;

        let mut managed = Managed {
            descriptor: Arc::clone(descriptor),
            instance,
            crud: None,
            delegates: None,
        };
        self.autowire(&mut managed, path)?;
        Ok(managed)
    }

    fn autowire(&self, managed: &mut Managed, path: &mut ResolutionPath) -> Result<()> {
        let descriptor = Arc::clone(&managed.descriptor);

        if let Some(controller) = descriptor.controller() {
            if let Some(service) = &controller.service {
                let service = self.singleton_in(service, path)?;
                match service.crud.as_ref() {
                    Some(handle) if descriptor.supports_dynamic_methods() => {
                        debug!(
                            controller = descriptor.name(),
                            service = service.type_name(),
                            "Attaching CRUD delegators"
                        );
                        managed.delegates = Some(Arc::new(ControllerCrud::new(Arc::clone(handle))));
                    }
                    Some(_) => warn!(
                        controller = descriptor.name(),
                        "Controller does not support dynamic methods, CRUD delegators skipped"
                    ),
                    None => {}
                }
            }
        }

        if let Some(service) = descriptor.service() {
            let Some(storage) = &service.storage else {
                return Ok(());
            };
            if !descriptor.supports_dynamic_methods() {
                warn!(
                    service = descriptor.name(),
                    "Service does not support dynamic methods, CRUD operations skipped"
                );
                return Ok(());
            }

            let contract_error = || Error::InvalidAdapterContract {
                service: descriptor.name().to_string(),
                adapter: storage.clone(),
            };
            let adapter_descriptor = self.inner.catalog.describe(storage)?;
            if !adapter_descriptor.implements_storage() {
                return Err(contract_error());
            }
            let adapter = self.instantiate_in(storage, None, &RequestContext::new(), path)?;
            let adapter = adapter_descriptor
                .as_storage(Arc::clone(&adapter.instance))
                .ok_or_else(contract_error)?;

            if let Some(entity) = &service.entity {
                let entity = self.inner.catalog.describe(entity)?;
                let handle = ServiceHandle::new(
                    descriptor.name(),
                    entity,
                    adapter,
                    descriptor.policy().map(|policy| policy.provider.clone()),
                    self.inner.deserializer.clone(),
                    self.inner.events.clone(),
                    self.downgrade(),
                );
                debug!(
                    service = descriptor.name(),
                    collection = handle.collection(),
                    "Attaching CRUD operations"
                );
                handle.init()?;
                managed.crud = Some(Arc::new(handle));
            }
        }

        Ok(())
    }

    fn resolve_in(
        &self,
        params: &[ParamDescriptor],
        method: &str,
        ctx: &RequestContext,
        path: &mut ResolutionPath,
    ) -> Result<Arguments> {
        let mut args = Arguments::new();
        for param in params {
            let argument = self.resolve_one(param, method, ctx, path)?;
            args.push(param.name.clone(), argument);
        }
        Ok(args)
    }

    fn resolve_one(
        &self,
        param: &ParamDescriptor,
        method: &str,
        ctx: &RequestContext,
        path: &mut ResolutionPath,
    ) -> Result<Argument> {
        match &param.ty {
            ParamType::Config => Ok(Argument::Config(self.inner.config.clone())),
            ParamType::Catalog => Ok(Argument::Catalog(self.inner.catalog.clone())),
            ParamType::Resolver => Ok(Argument::Resolver(self.clone())),
            ParamType::EventBus => Ok(Argument::EventBus(self.inner.events.clone())),
            ParamType::Object(type_name) => self.resolve_object(param, type_name, ctx, path),
            ParamType::Scalar(kind) => self.resolve_scalar(param, *kind, method, ctx),
        }
    }

    fn resolve_object(
        &self,
        param: &ParamDescriptor,
        type_name: &str,
        ctx: &RequestContext,
        path: &mut ResolutionPath,
    ) -> Result<Argument> {
        let descriptor = self.inner.catalog.describe(type_name)?;

        if descriptor.has_marker(MarkerKind::Service) {
            let service = self.singleton_in(type_name, path)?;
            return Ok(Argument::Service {
                instance: service.instance,
                handle: service.crud,
            });
        }

        if descriptor.has_marker(MarkerKind::Entity) {
            let entity = match ctx.get(&param.name) {
                Some(raw @ JsonValue::Object(_)) => self.inner.deserializer.deserialize(type_name, raw)?,
                None | Some(JsonValue::Null) => self
                    .inner
                    .deserializer
                    .deserialize(type_name, &JsonValue::Object(Default::default()))?,
                Some(other) => {
                    return Err(Error::MalformedPayload(format!(
                        "parameter {} expects a mapping for {}, received {}",
                        param.name, type_name, other
                    )));
                }
            };
            return Ok(Argument::Entity(entity));
        }

        let constructor = descriptor.constructor().ok_or_else(|| {
            Error::InvalidArgument(format!("type {} declares no constructor", type_name))
        })?;
        if constructor.is_parameterless() {
            return Ok(Argument::Instance(constructor.build(&Arguments::new())?));
        }

        // Nested objects never see the request context.
        self.enter(type_name, path)?;
        let args = self.resolve_in(
            &constructor.params,
            &format!("{}::new", type_name),
            &RequestContext::new(),
            path,
        );
        path.pop();
        Ok(Argument::Instance(constructor.build(&args?)?))
    }

    fn resolve_scalar(
        &self,
        param: &ParamDescriptor,
        kind: ScalarKind,
        method: &str,
        ctx: &RequestContext,
    ) -> Result<Argument> {
        if let Some(value) = ctx.get(&param.name).filter(|value| !value.is_null()) {
            return coerce_scalar(param, kind, value).map(Argument::Value);
        }
        if let Some(default) = param.default() {
            return Ok(Argument::Value(default.clone()));
        }
        if let Some(raw) = ctx.query(&param.name) {
            return coerce_scalar(param, kind, &JsonValue::String(raw.clone())).map(Argument::Value);
        }
        if param.nullable || param.optional {
            return Ok(Argument::Null);
        }
        Err(Error::UnresolvableParameter {
            parameter: param.name.clone(),
            method: method.to_string(),
        })
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cached: Vec<String> = self.inner.services.read().keys().cloned().collect();
        cached.sort();
        f.debug_struct("Resolver")
            .field("catalog", &self.inner.catalog)
            .field("cached", &cached)
            .finish()
    }
}

/// Convert a context value to a parameter's declared scalar kind
fn coerce_scalar(param: &ParamDescriptor, kind: ScalarKind, value: &JsonValue) -> Result<JsonValue> {
    let invalid = || {
        Error::InvalidArgument(format!(
            "parameter {} expects {}, received {}",
            param.name,
            scalar_name(kind),
            value
        ))
    };

    match (kind, value) {
        (ScalarKind::Mixed, _) => Ok(value.clone()),

        (ScalarKind::Int, JsonValue::Number(n)) => match n.as_i64() {
            Some(i) => Ok(JsonValue::from(i)),
            None => n.as_f64().map(|f| JsonValue::from(f as i64)).ok_or_else(invalid),
        },
        (ScalarKind::Int, JsonValue::Bool(b)) => Ok(JsonValue::from(i64::from(*b))),
        (ScalarKind::Int, JsonValue::String(s)) => {
            s.trim().parse::<i64>().map(JsonValue::from).map_err(|_| invalid())
        }

        (ScalarKind::Float, JsonValue::Number(n)) => {
            n.as_f64().map(JsonValue::from).ok_or_else(invalid)
        }
        (ScalarKind::Float, JsonValue::String(s)) => {
            s.trim().parse::<f64>().map(JsonValue::from).map_err(|_| invalid())
        }

        (ScalarKind::Bool, JsonValue::Bool(_)) => Ok(value.clone()),
        (ScalarKind::Bool, JsonValue::Number(n)) => {
            Ok(JsonValue::Bool(n.as_f64().is_some_and(|f| f != 0.0)))
        }
        (ScalarKind::Bool, JsonValue::String(s)) => match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(JsonValue::Bool(true)),
            "" | "0" | "false" | "no" | "off" => Ok(JsonValue::Bool(false)),
            _ => Err(invalid()),
        },

        (ScalarKind::String, JsonValue::String(_)) => Ok(value.clone()),
        (ScalarKind::String, JsonValue::Number(n)) => Ok(JsonValue::String(n.to_string())),
        (ScalarKind::String, JsonValue::Bool(b)) => Ok(JsonValue::String(b.to_string())),

        (ScalarKind::Array, JsonValue::Array(_) | JsonValue::Object(_)) => Ok(value.clone()),
        (ScalarKind::Array, JsonValue::String(s)) => match serde_json::from_str::<JsonValue>(s) {
            Ok(parsed @ (JsonValue::Array(_) | JsonValue::Object(_))) => Ok(parsed),
            _ => Err(invalid()),
        },

        _ => Err(invalid()),
    }
}

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int => "an integer",
        ScalarKind::Float => "a number",
        ScalarKind::Bool => "a boolean",
        ScalarKind::String => "a string",
        ScalarKind::Array => "an array",
        ScalarKind::Mixed => "any value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Constructor, MethodDescriptor, ServiceMarker};
    use serde_json::json;

    #[derive(Default)]
    struct Clock;

    struct Greeter {
        greeting: String,
    }

    fn catalog() -> TypeCatalog {
        let catalog = TypeCatalog::new();
        catalog
            .register(
                TypeDescriptor::builder("app::Service::Clock")
                    .service(ServiceMarker::new())
                    .default_constructor::<Clock>()
                    .build(),
            )
            .register(
                TypeDescriptor::builder("app::Greeter")
                    .constructor(Constructor::new(
                        vec![ParamDescriptor::string("greeting").with_default("hello")],
                        |args| {
                            Ok(Greeter {
                                greeting: args.string("greeting")?,
                            })
                        },
                    ))
                    .method(MethodDescriptor::new(
                        "greet",
                        vec![ParamDescriptor::string("name")],
                        |g: &Greeter, args| Ok(format!("{} {}", g.greeting, args.string("name")?).into()),
                    ))
                    .build(),
            );
        catalog
    }

    fn resolver() -> Resolver {
        Resolver::new(catalog(), ConfigManager::new(), EventBus::new())
    }

    #[test]
    fn test_services_are_singletons() {
        let resolver = resolver();
        let ctx = RequestContext::new();
        let first = resolver.instantiate("app::Service::Clock", None, &ctx).unwrap();
        let second = resolver.instantiate("app::Service::Clock", None, &ctx).unwrap();
        assert!(Arc::ptr_eq(first.instance(), second.instance()));
        assert!(resolver.is_cached("app::Service::Clock"));
    }

    #[test]
    fn test_plain_types_are_not_cached() {
        let resolver = resolver();
        let ctx = RequestContext::new();
        let first = resolver.instantiate("app::Greeter", None, &ctx).unwrap();
        let second = resolver.instantiate("app::Greeter", None, &ctx).unwrap();
        assert!(!Arc::ptr_eq(first.instance(), second.instance()));
        assert_eq!(first.downcast::<Greeter>().unwrap().greeting, "hello");
    }

    #[test]
    fn test_invoke_resolves_from_context() {
        let resolver = resolver();
        let ctx = RequestContext::new().with("name", "Ada");
        let greeter = resolver.instantiate("app::Greeter", None, &ctx).unwrap();
        let reply = resolver.invoke(&greeter, "greet", &ctx).unwrap();
        assert!(matches!(reply, Reply::Text(text) if text == "hello Ada"));

        assert!(matches!(
            resolver.invoke(&greeter, "wave", &ctx),
            Err(Error::MethodNotFound { .. })
        ));
    }

    #[test]
    fn test_scalar_priority() {
        let resolver = resolver();
        let params = vec![
            ParamDescriptor::int("limit").with_default(20),
            ParamDescriptor::int("start").with_default(0),
            ParamDescriptor::string("q"),
            ParamDescriptor::string("note").nullable(),
        ];
        let ctx = RequestContext::new()
            .with("limit", "5")
            .with("start", JsonValue::Null)
            .with_query("q", "gears")
            .with_query("start", "9");

        let args = resolver.resolve_parameters(&params, "list", &ctx).unwrap();
        assert_eq!(args.int("limit").unwrap(), 5);
        // A falsy default still beats the query string.
        assert_eq!(args.int("start").unwrap(), 0);
        assert_eq!(args.string("q").unwrap(), "gears");
        assert!(matches!(args.get("note"), Some(Argument::Null)));
    }

    #[test]
    fn test_unresolvable_parameter_names_culprit() {
        let resolver = resolver();
        let err = resolver
            .resolve_parameters(&[ParamDescriptor::int("id")], "show", &RequestContext::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvableParameter { parameter, method } if parameter == "id" && method == "show"
        ));
    }

    #[test]
    fn test_scalar_coercion_rejects_garbage() {
        let resolver = resolver();
        let ctx = RequestContext::new().with("id", "forty-two");
        assert!(matches!(
            resolver.resolve_parameters(&[ParamDescriptor::int("id")], "one", &ctx),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_framework_types_are_injected() {
        let resolver = resolver();
        let params = vec![
            ParamDescriptor::config("config"),
            ParamDescriptor::new("resolver", ParamType::Resolver),
            ParamDescriptor::new("catalog", ParamType::Catalog),
            ParamDescriptor::object("clock", "app::Service::Clock"),
        ];
        let args = resolver
            .resolve_parameters(&params, "new", &RequestContext::new())
            .unwrap();
        assert!(args.config("config").is_ok());
        assert!(args.resolver("resolver").is_ok());
        assert!(args.catalog("catalog").is_ok());
        assert!(args.instance::<Clock>("clock").is_ok());
        assert!(resolver.is_cached("app::Service::Clock"));
    }

    #[test]
    fn test_weak_handle_does_not_keep_resolver_alive() {
        let resolver = resolver();
        let weak = resolver.downgrade();
        assert!(weak.upgrade().is_some());
        drop(resolver);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_array_parameter_accepts_json_text_from_query() {
        let resolver = resolver();
        let ctx = RequestContext::new().with_query("where", r#"{"Name":"a"}"#);
        let args = resolver
            .resolve_parameters(&[ParamDescriptor::array("where")], "list", &ctx)
            .unwrap();
        assert_eq!(args.value("where").unwrap(), Some(&json!({"Name": "a"})));
    }
}
