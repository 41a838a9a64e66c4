// Per-action authorization hook for synthesized services

use crate::error::Error;
use crate::value::Entity;
use std::fmt;
use std::str::FromStr;

/// The four checks a policy provider must expose.
///
/// `entity` is `None` for list reads and for loads that found nothing.
pub trait SecurityPolicy: Send + Sync {
    fn can_read(&self, entity: Option<&Entity>, entity_type: &str) -> bool;
    fn can_create(&self, entity: Option<&Entity>, entity_type: &str) -> bool;
    fn can_update(&self, entity: Option<&Entity>, entity_type: &str) -> bool;
    fn can_delete(&self, entity: Option<&Entity>, entity_type: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyAction {
    Read,
    Create,
    Update,
    Delete,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Read => "read",
            PolicyAction::Create => "create",
            PolicyAction::Update => "update",
            PolicyAction::Delete => "delete",
        }
    }

    /// Run the matching check on `policy`
    pub fn check(&self, policy: &dyn SecurityPolicy, entity: Option<&Entity>, entity_type: &str) -> bool {
        match self {
            PolicyAction::Read => policy.can_read(entity, entity_type),
            PolicyAction::Create => policy.can_create(entity, entity_type),
            PolicyAction::Update => policy.can_update(entity, entity_type),
            PolicyAction::Delete => policy.can_delete(entity, entity_type),
        }
    }
}

impl FromStr for PolicyAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(PolicyAction::Read),
            "create" => Ok(PolicyAction::Create),
            "update" => Ok(PolicyAction::Update),
            "delete" => Ok(PolicyAction::Delete),
            _ => Err(Error::InvalidArgument(format!("unknown policy action: {}", s))),
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SecurityPolicy for AllowAll {
    fn can_read(&self, _: Option<&Entity>, _: &str) -> bool {
        true
    }
    fn can_create(&self, _: Option<&Entity>, _: &str) -> bool {
        true
    }
    fn can_update(&self, _: Option<&Entity>, _: &str) -> bool {
        true
    }
    fn can_delete(&self, _: Option<&Entity>, _: &str) -> bool {
        true
    }
}
