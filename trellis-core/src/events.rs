//! Entity lifecycle event bus.
//!
//! Handlers subscribe to an (entity type, phase) pair and run in
//! subscription order. A handler may return a replacement entity of the
//! same type, which is what later handlers and the caller see.

use crate::catalog::TypeCatalog;
use crate::error::{Error, Result};
use crate::logging::{debug, trace};
use crate::resolver::Resolver;
use crate::value::Entity;
use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl LifecyclePhase {
    pub const ALL: [LifecyclePhase; 6] = [
        LifecyclePhase::BeforeCreate,
        LifecyclePhase::AfterCreate,
        LifecyclePhase::BeforeUpdate,
        LifecyclePhase::AfterUpdate,
        LifecyclePhase::BeforeDelete,
        LifecyclePhase::AfterDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::BeforeCreate => "BeforeCreate",
            LifecyclePhase::AfterCreate => "AfterCreate",
            LifecyclePhase::BeforeUpdate => "BeforeUpdate",
            LifecyclePhase::AfterUpdate => "AfterUpdate",
            LifecyclePhase::BeforeDelete => "BeforeDelete",
            LifecyclePhase::AfterDelete => "AfterDelete",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl FromStr for LifecyclePhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LifecyclePhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown lifecycle phase: {}", s)))
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the current entity and, for updates, the stored original
pub type EventHandler =
    Arc<dyn Fn(&Entity, Option<&Entity>) -> Result<Option<Entity>> + Send + Sync>;

type PhaseTable = [Vec<EventHandler>; 6];

/// Subscription table shared by every clone of the bus
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<DashMap<String, PhaseTable>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, phase: LifecyclePhase, entity_type: impl Into<String>, handler: F)
    where
        F: Fn(&Entity, Option<&Entity>) -> Result<Option<Entity>> + Send + Sync + 'static,
    {
        self.subscribe_handler(phase, entity_type, Arc::new(handler));
    }

    pub fn subscribe_handler(
        &self,
        phase: LifecyclePhase,
        entity_type: impl Into<String>,
        handler: EventHandler,
    ) {
        let entity_type = entity_type.into();
        debug!(entity_type = %entity_type, phase = %phase, "Subscribing event handler");
        // First subscription for a type creates all six slots.
        self.subscriptions
            .entry(entity_type)
            .or_default()
            .value_mut()[phase.slot()]
            .push(handler);
    }

    /// Run the handlers for `entity`'s type and `phase`, returning the
    /// entity as left by the last replacing handler.
    pub fn dispatch(
        &self,
        phase: LifecyclePhase,
        entity: Entity,
        original: Option<&Entity>,
    ) -> Result<Entity> {
        let handlers = match self.subscriptions.get(entity.type_name()) {
            Some(table) => table[phase.slot()].clone(),
            None => return Ok(entity),
        };

        trace!(
            entity_type = entity.type_name(),
            phase = %phase,
            handlers = handlers.len(),
            "Dispatching lifecycle event"
        );

        let mut current = entity;
        for handler in handlers {
            if let Some(replacement) = handler(&current, original)? {
                if replacement.type_name() == current.type_name() {
                    current = replacement;
                } else {
                    debug!(
                        expected = current.type_name(),
                        returned = replacement.type_name(),
                        "Ignoring handler result of a different type"
                    );
                }
            }
        }
        Ok(current)
    }

    pub fn handler_count(&self, phase: LifecyclePhase, entity_type: &str) -> usize {
        self.subscriptions
            .get(entity_type)
            .map(|table| table[phase.slot()].len())
            .unwrap_or(0)
    }

    /// Whether any handler was ever subscribed for `entity_type`
    pub fn has_entity_type(&self, entity_type: &str) -> bool {
        self.subscriptions.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    /// Subscribe every listener declared in `catalog`.
    ///
    /// The owning instance is resolved through the resolver's singleton cache
    /// when the event first fires, not at subscription time.
    pub fn register_listeners(&self, catalog: &TypeCatalog, resolver: &Resolver) -> Result<usize> {
        let mut registered = 0;
        for descriptor in catalog.app_types()?.iter() {
            for listener in descriptor.listeners() {
                let weak = resolver.downgrade();
                let owner = descriptor.name().to_string();
                let listener = listener.clone();
                let phase = listener.marker.phase;
                let entity_type = listener.marker.entity.clone();

                debug!(
                    owner = %owner,
                    method = %listener.method,
                    entity_type = %entity_type,
                    phase = %phase,
                    "Registering event listener"
                );

                self.subscribe(phase, entity_type, move |entity, original| {
                    let resolver = weak.upgrade().ok_or_else(|| {
                        Error::Internal(format!("resolver for listener {} was dropped", owner))
                    })?;
                    let managed = resolver.singleton(&owner)?;
                    listener.call(managed.instance(), entity, original)
                });
                registered += 1;
            }
        }
        Ok(registered)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("entity_types", &self.entity_types())
            .finish()
    }
}
