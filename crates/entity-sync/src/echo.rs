//! Self-echo suppression.
//!
//! The server broadcasts a user's own edits back to them. For actions the UI
//! has already applied optimistically, re-applying the echo would clobber
//! in-progress local edits, so those are dropped when the origin actor is the
//! local actor.

use crate::event::{Action, CanonicalEvent, EntityType};

/// Default `(entity type, action)` pairs whose self-echo is dropped.
pub const DEFAULT_SUPPRESSIBLE: [(EntityType, Action); 3] = [
    (EntityType::Module, Action::Updated),
    (EntityType::Tool, Action::Updated),
    (EntityType::Workflow, Action::Updated),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoPolicy {
    enabled: bool,
    suppressible: Vec<(EntityType, Action)>,
}

impl Default for EchoPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            suppressible: DEFAULT_SUPPRESSIBLE.to_vec(),
        }
    }
}

impl EchoPolicy {
    /// Policy that applies every event regardless of origin.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn is_suppressible(&self, entity_type: EntityType, action: Action) -> bool {
        self.suppressible.contains(&(entity_type, action))
    }

    /// False only for a suppressible echo of the local actor's own change.
    #[must_use]
    pub fn should_apply(&self, event: &CanonicalEvent, local_actor_id: Option<&str>) -> bool {
        if !self.enabled || !self.is_suppressible(event.entity_type, event.action()) {
            return true;
        }
        match (event.origin_actor_id.as_deref(), local_actor_id) {
            (Some(origin), Some(local)) => origin != local,
            _ => true,
        }
    }
}

/// [`EchoPolicy::should_apply`] with the default policy.
#[must_use]
pub fn should_apply(event: &CanonicalEvent, local_actor_id: Option<&str>) -> bool {
    EchoPolicy::default().should_apply(event, local_actor_id)
}
