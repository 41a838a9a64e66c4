// Resolved arguments handed to constructors, methods and CLI actions

use crate::catalog::TypeCatalog;
use crate::crud::ServiceHandle;
use crate::descriptor::Instance;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::resolver::Resolver;
use crate::value::Entity;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use trellis_config::ConfigManager;

/// One resolved parameter value
#[derive(Clone)]
pub enum Argument {
    /// Bound to null (nullable or optional parameter without a value)
    Null,
    /// Scalar, array or untyped value
    Value(JsonValue),
    Entity(Entity),
    /// Any other discoverable object
    Instance(Instance),
    /// A cached service with its synthesized operations, if any
    Service {
        instance: Instance,
        handle: Option<Arc<ServiceHandle>>,
    },
    Config(ConfigManager),
    Catalog(TypeCatalog),
    Resolver(Resolver),
    EventBus(EventBus),
}

impl Argument {
    fn kind(&self) -> &'static str {
        match self {
            Argument::Null => "null",
            Argument::Value(_) => "value",
            Argument::Entity(_) => "entity",
            Argument::Instance(_) => "instance",
            Argument::Service { .. } => "service",
            Argument::Config(_) => "config",
            Argument::Catalog(_) => "catalog",
            Argument::Resolver(_) => "resolver",
            Argument::EventBus(_) => "event bus",
        }
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Value(value) => write!(f, "Value({})", value),
            Argument::Entity(entity) => write!(f, "Entity({})", entity.type_name()),
            other => f.write_str(other.kind()),
        }
    }
}

/// Arguments in parameter order, looked up by parameter name
#[derive(Clone, Debug, Default)]
pub struct Arguments {
    values: IndexMap<String, Argument>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, argument: Argument) {
        self.values.insert(name.into(), argument);
    }

    pub fn with(mut self, name: impl Into<String>, argument: Argument) -> Self {
        self.push(name, argument);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn require(&self, name: &str) -> Result<&Argument> {
        self.values
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("no argument named {}", name)))
    }

    fn mismatch(name: &str, expected: &str, found: &Argument) -> Error {
        Error::InvalidArgument(format!(
            "argument {} is a {}, expected {}",
            name,
            found.kind(),
            expected
        ))
    }

    /// Raw value of a scalar argument; `None` when bound to null
    pub fn value(&self, name: &str) -> Result<Option<&JsonValue>> {
        match self.require(name)? {
            Argument::Null => Ok(None),
            Argument::Value(value) => Ok(Some(value)),
            other => Err(Self::mismatch(name, "value", other)),
        }
    }

    /// Deserialize a scalar argument, `None` when bound to null
    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.value(name)?
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    Error::InvalidArgument(format!("argument {} has the wrong shape: {}", name, e))
                })
            })
            .transpose()
    }

    /// Deserialize a required scalar argument
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.optional(name)?
            .ok_or_else(|| Error::InvalidArgument(format!("argument {} is null", name)))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        self.parse(name)
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        self.parse(name)
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        self.parse(name)
    }

    pub fn string(&self, name: &str) -> Result<String> {
        self.parse(name)
    }

    pub fn entity(&self, name: &str) -> Result<&Entity> {
        match self.require(name)? {
            Argument::Entity(entity) => Ok(entity),
            other => Err(Self::mismatch(name, "entity", other)),
        }
    }

    /// Downcast an object or service argument
    pub fn instance<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let instance = match self.require(name)? {
            Argument::Instance(instance) => instance,
            Argument::Service { instance, .. } => instance,
            other => return Err(Self::mismatch(name, "object", other)),
        };
        Arc::clone(instance).downcast::<T>().map_err(|_| {
            Error::InvalidArgument(format!(
                "argument {} is not a {}",
                name,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Synthesized operations of a service argument
    pub fn service_handle(&self, name: &str) -> Result<Arc<ServiceHandle>> {
        match self.require(name)? {
            Argument::Service {
                handle: Some(handle),
                ..
            } => Ok(Arc::clone(handle)),
            Argument::Service { handle: None, .. } => Err(Error::InvalidArgument(format!(
                "service argument {} has no entity operations",
                name
            ))),
            other => Err(Self::mismatch(name, "service", other)),
        }
    }

    pub fn config(&self, name: &str) -> Result<&ConfigManager> {
        match self.require(name)? {
            Argument::Config(config) => Ok(config),
            other => Err(Self::mismatch(name, "config", other)),
        }
    }

    pub fn catalog(&self, name: &str) -> Result<&TypeCatalog> {
        match self.require(name)? {
            Argument::Catalog(catalog) => Ok(catalog),
            other => Err(Self::mismatch(name, "catalog", other)),
        }
    }

    pub fn resolver(&self, name: &str) -> Result<&Resolver> {
        match self.require(name)? {
            Argument::Resolver(resolver) => Ok(resolver),
            other => Err(Self::mismatch(name, "resolver", other)),
        }
    }

    pub fn event_bus(&self, name: &str) -> Result<&EventBus> {
        match self.require(name)? {
            Argument::EventBus(bus) => Ok(bus),
            other => Err(Self::mismatch(name, "event bus", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_accessors() {
        let args = Arguments::new()
            .with("id", Argument::Value(json!(42)))
            .with("name", Argument::Value(json!("gear")))
            .with("note", Argument::Null);

        assert_eq!(args.int("id").unwrap(), 42);
        assert_eq!(args.string("name").unwrap(), "gear");
        assert_eq!(args.optional::<String>("note").unwrap(), None);
        assert!(args.int("note").is_err());
        assert!(args.int("missing").is_err());
        assert!(args.int("name").is_err());
    }

    #[test]
    fn test_mismatched_kind() {
        let args = Arguments::new().with("cfg", Argument::Config(ConfigManager::new()));
        assert!(args.config("cfg").is_ok());
        let err = args.entity("cfg").unwrap_err();
        assert!(err.to_string().contains("config"));
    }

    #[test]
    fn test_instance_downcast() {
        let args = Arguments::new().with("n", Argument::Instance(Arc::new(7u32)));
        assert_eq!(*args.instance::<u32>("n").unwrap(), 7);
        assert!(args.instance::<String>("n").is_err());
    }

    #[test]
    fn test_order_is_parameter_order() {
        let args = Arguments::new()
            .with("b", Argument::Null)
            .with("a", Argument::Null);
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
