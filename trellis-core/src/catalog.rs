//! Type catalog.
//!
//! Holds every discoverable type's registration, builds descriptors on
//! first lookup and memoizes them for the lifetime of the catalog. Types
//! are registered explicitly or submitted at link time with
//! [`register_type!`](crate::register_type) and gathered by
//! [`TypeCatalog::discover`].

use crate::descriptor::{MarkerKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::logging::{debug, trace};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds the descriptor of a registered type
pub type DescribeFn = Arc<dyn Fn() -> TypeDescriptor + Send + Sync>;

/// A type submitted through [`register_type!`](crate::register_type)
pub struct TypeRegistration {
    pub name: &'static str,
    pub describe: fn() -> TypeDescriptor,
}

impl TypeRegistration {
    pub const fn new(name: &'static str, describe: fn() -> TypeDescriptor) -> Self {
        Self { name, describe }
    }
}

inventory::collect!(TypeRegistration);

/// Submit a type to the link-time registry.
///
/// ```ignore
/// fn describe_widget() -> TypeDescriptor { ... }
/// trellis_core::register_type!("app::Entity::Widget", describe_widget);
/// ```
#[macro_export]
macro_rules! register_type {
    ($name:expr, $describe:path) => {
        $crate::inventory::submit! {
            $crate::catalog::TypeRegistration::new($name, $describe)
        }
    };
}

#[derive(Clone)]
enum Registration {
    Lazy(DescribeFn),
    Built(Arc<TypeDescriptor>),
}

#[derive(Default)]
struct CatalogInner {
    registrations: RwLock<IndexMap<String, Registration>>,
    descriptors: RwLock<HashMap<String, Arc<TypeDescriptor>>>,
    app_types: RwLock<Option<Arc<Vec<Arc<TypeDescriptor>>>>>,
}

/// Memoizing registry of type descriptors
#[derive(Clone, Default)]
pub struct TypeCatalog {
    inner: Arc<CatalogInner>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding every type submitted with `register_type!`
    pub fn discover() -> Self {
        let catalog = Self::new();
        for entry in inventory::iter::<TypeRegistration> {
            let describe = entry.describe;
            catalog.register_with(entry.name, move || describe());
        }
        debug!(types = catalog.len(), "Discovered registered types");
        catalog
    }

    /// Register an already built descriptor
    pub fn register(&self, descriptor: TypeDescriptor) -> &Self {
        let name = descriptor.name().to_string();
        self.insert(name, Registration::Built(Arc::new(descriptor)));
        self
    }

    /// Register a type whose descriptor is built on first lookup
    pub fn register_with<F>(&self, name: impl Into<String>, describe: F) -> &Self
    where
        F: Fn() -> TypeDescriptor + Send + Sync + 'static,
    {
        self.insert(name.into(), Registration::Lazy(Arc::new(describe)));
        self
    }

    fn insert(&self, name: String, registration: Registration) {
        debug!(type_name = %name, "Registering type");
        // A re-registration replaces the previous entry and its memoized descriptor.
        self.inner.descriptors.write().remove(&name);
        self.inner.registrations.write().insert(name, registration);
        *self.inner.app_types.write() = None;
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registrations.read().contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.inner.registrations.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor of `name`, built once and shared afterwards
    pub fn describe(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        if let Some(descriptor) = self.inner.descriptors.read().get(name) {
            trace!(type_name = name, "Descriptor cache hit");
            return Ok(Arc::clone(descriptor));
        }

        let registration = self
            .inner
            .registrations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownType(name.to_string()))?;
        let built = match registration {
            Registration::Built(descriptor) => descriptor,
            Registration::Lazy(describe) => Arc::new(describe()),
        };

        trace!(type_name = name, "Descriptor built");
        let mut descriptors = self.inner.descriptors.write();
        let descriptor = descriptors.entry(name.to_string()).or_insert(built);
        Ok(Arc::clone(descriptor))
    }

    /// Every application type, described once and cached in registration order
    pub fn app_types(&self) -> Result<Arc<Vec<Arc<TypeDescriptor>>>> {
        if let Some(types) = self.inner.app_types.read().as_ref() {
            return Ok(Arc::clone(types));
        }

        let types = self
            .names()
            .iter()
            .map(|name| self.describe(name))
            .collect::<Result<Vec<_>>>()?;
        let types = Arc::new(types);
        debug!(types = types.len(), "Application type list cached");

        *self.inner.app_types.write() = Some(Arc::clone(&types));
        Ok(types)
    }

    /// Application types carrying `kind`, in registration order
    pub fn find_by_marker(&self, kind: MarkerKind) -> Result<Vec<Arc<TypeDescriptor>>> {
        Ok(self
            .app_types()?
            .iter()
            .filter(|descriptor| descriptor.has_marker(kind))
            .cloned()
            .collect())
    }
}

impl fmt::Debug for TypeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCatalog")
            .field("types", &self.names())
            .finish()
    }
}
