// Core library for the Trellis runtime
// Type catalog, resolver and CRUD autowiring, event bus, router and the
// application bootstrapper.

pub mod application;
pub mod arguments;
pub mod catalog;
pub mod context;
pub mod crud;
pub mod descriptor;
pub mod deserializer;
pub mod error;
pub mod events;
pub mod http;
pub mod logging;
pub mod policy;
pub mod resolver;
pub mod routing;
pub mod storage;
pub mod value;

// Used by `register_type!`
pub use inventory;

// Re-export commonly used types
pub use application::{Application, ApplicationBuilder};
pub use arguments::{Argument, Arguments};
pub use catalog::{TypeCatalog, TypeRegistration};
pub use context::RequestContext;
pub use crud::{ControllerCrud, EntityInput, ServiceHandle, collection_name};
pub use descriptor::*;
pub use deserializer::Deserializer;
pub use error::{Error, Result};
pub use events::{EventBus, EventHandler, LifecyclePhase};
pub use http::{HttpRequest, HttpResponse, Reply};
pub use policy::{AllowAll, PolicyAction, SecurityPolicy};
pub use resolver::{Managed, Resolver, WeakResolver};
pub use routing::{HttpMethod, RouteMatch, RouteTarget, Router};
pub use storage::{
    ColumnSpec, ColumnType, Condition, Conditions, Row, SortOrder, StorageAdapter, StorageError,
};
pub use trellis_config::ConfigManager;
pub use value::{Entity, Value};

pub mod prelude {
    pub use crate::application::Application;
    pub use crate::arguments::Arguments;
    pub use crate::catalog::TypeCatalog;
    pub use crate::context::RequestContext;
    pub use crate::descriptor::{
        Constructor, ControllerMarker, FieldDescriptor, FieldType, ListenerDescriptor,
        MethodDescriptor, ParamDescriptor, RouteMarker, ServiceMarker, TypeDescriptor,
    };
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventBus, LifecyclePhase};
    pub use crate::http::{HttpRequest, HttpResponse, Reply};
    pub use crate::logging::{LogConfig, LogDecorations, LogFormat, LogLevel, LogOutput};
    pub use crate::policy::SecurityPolicy;
    pub use crate::register_type;
    pub use crate::storage::{Conditions, SortOrder, StorageAdapter};
    pub use crate::value::{Entity, Value};
    pub use trellis_config::ConfigManager;
}
