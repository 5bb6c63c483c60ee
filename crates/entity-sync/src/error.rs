//! Error taxonomy for adapters, event construction and store invariants.

use thiserror::Error;

use crate::event::EntityType;

/// Canonical event construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventShapeError {
    #[error("event_missing_id")]
    MissingId,
    #[error("event_ids_empty")]
    EmptyIds,
    #[error("event_id_blank")]
    BlankId,
}

/// Reasons an inbound frame (or one entry of a batch frame) produced no event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdaptError {
    #[error("frame_not_object")]
    NotAnObject,
    #[error("frame_missing_type")]
    MissingType,
    #[error("unknown_event_type:{0}")]
    UnknownType(String),
    #[error("unknown_entity:{0}")]
    UnknownEntity(String),
    #[error("unknown_action:{0}")]
    UnknownAction(String),
    #[error("malformed_event:{wire_type}:{reason}")]
    Malformed { wire_type: String, reason: String },
    #[error("template_target_missing:{0}")]
    TemplateTargetMissing(String),
    #[error("invalid_event_shape:{wire_type}:{source}")]
    Shape {
        wire_type: String,
        #[source]
        source: EventShapeError,
    },
}

impl AdaptError {
    pub(crate) fn malformed(wire_type: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            wire_type: wire_type.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(wire_type: &str, source: EventShapeError) -> Self {
        Self::Shape {
            wire_type: wire_type.to_string(),
            source,
        }
    }

    /// True for frames whose type or entity is not part of the vocabulary.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(
            self,
            Self::UnknownType(_) | Self::UnknownEntity(_) | Self::UnknownAction(_)
        )
    }
}

/// Bijection violations between a table's id list and its record map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreInvariantError {
    #[error("listed_id_without_record:{entity_type}:{id}")]
    ListedWithoutRecord { entity_type: EntityType, id: String },
    #[error("record_not_listed:{entity_type}:{id}")]
    RecordNotListed { entity_type: EntityType, id: String },
    #[error("duplicate_listed_id:{entity_type}:{id}")]
    DuplicateListedId { entity_type: EntityType, id: String },
}
