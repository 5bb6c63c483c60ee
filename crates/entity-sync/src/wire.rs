//! Field extraction shared by the legacy and dotted-format adapters.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AdaptError, EventShapeError};
use crate::event::{
    Action, CanonicalEvent, EntityType, ParentRef, Record, SourceFormat, TABLE_NAME_FIELD,
    TemplateScope, TemplateTarget, id_from_value, resolve_template_target,
};

/// How a table record frame names its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TableRef {
    Id(String),
    /// Resolved against loaded tables by the session.
    Name(String),
}

impl TableRef {
    pub fn scope(&self, event: CanonicalEvent) -> CanonicalEvent {
        match self {
            Self::Id(table_id) => event.scoped_to_table(table_id),
            Self::Name(table_name) => event.with_parent(Some(ParentRef {
                field: TABLE_NAME_FIELD,
                id: table_name.clone(),
            })),
        }
    }
}

/// Envelope fields common to both wire formats.
#[derive(Debug, Clone)]
pub(crate) struct Envelope<'a> {
    pub wire_type: &'a str,
    pub fields: &'a Map<String, Value>,
    pub data: Option<&'a Value>,
    pub origin_actor_id: Option<String>,
    pub received_at_ms: u64,
    pub source_format: SourceFormat,
}

impl<'a> Envelope<'a> {
    pub fn parse(
        frame: &'a Value,
        received_at_ms: u64,
        source_format: SourceFormat,
    ) -> Result<Self, AdaptError> {
        let fields = frame.as_object().ok_or(AdaptError::NotAnObject)?;
        let wire_type = fields
            .get("type")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .ok_or(AdaptError::MissingType)?;
        Ok(Self {
            wire_type,
            fields,
            data: fields.get("data").filter(|value| !value.is_null()),
            origin_actor_id: fields.get("user_id").and_then(id_from_value),
            received_at_ms,
            source_format,
        })
    }

    pub fn data_object(&self) -> Result<&'a Map<String, Value>, AdaptError> {
        self.data
            .and_then(Value::as_object)
            .ok_or_else(|| AdaptError::malformed(self.wire_type, "missing data"))
    }

    /// Stamps origin, receipt time and source onto a freshly built event.
    pub fn finish(&self, event: CanonicalEvent) -> CanonicalEvent {
        event
            .with_origin(self.origin_actor_id.clone())
            .received_at(self.received_at_ms)
            .from_wire(self.source_format, self.wire_type)
    }

    /// Parent lookup order: envelope, then `data`, then the nested payload.
    pub fn parent_for(
        &self,
        entity_type: EntityType,
        payload: Option<&Record>,
    ) -> Option<ParentRef> {
        let field = entity_type.parent_field()?;
        let data = self.data.and_then(Value::as_object);
        [Some(self.fields), data, payload]
            .into_iter()
            .flatten()
            .find_map(|object| object.get(field).and_then(id_from_value))
            .map(|id| ParentRef { field, id })
    }

    /// Builds the standard created / updated / deleted event from `data`.
    pub fn standard_event(
        &self,
        entity_type: EntityType,
        action: Action,
        template: Option<&TemplateTarget>,
    ) -> Result<CanonicalEvent, AdaptError> {
        let data = self.data_object()?;
        let event = match action {
            Action::Created => {
                let attributes = object_field(data, "attributes").ok_or_else(|| {
                    AdaptError::malformed(self.wire_type, "missing data.attributes")
                })?;
                let parent = match template {
                    Some(target) => Some(target.parent()),
                    None => self.parent_for(entity_type, Some(attributes)),
                };
                CanonicalEvent::created(entity_type, attributes.clone())
                    .map_err(|source| AdaptError::shape(self.wire_type, source))?
                    .with_parent(parent)
            }
            Action::Updated => {
                let ids = self.ids(data)?;
                let changes = object_field(data, "changes")
                    .ok_or_else(|| AdaptError::malformed(self.wire_type, "missing data.changes"))?;
                let parent = match template {
                    Some(target) => Some(target.parent()),
                    None => self.parent_for(entity_type, Some(changes)),
                };
                CanonicalEvent::updated(entity_type, ids, changes.clone())
                    .map_err(|source| AdaptError::shape(self.wire_type, source))?
                    .with_parent(parent)
            }
            Action::Deleted => {
                let ids = self.ids(data)?;
                let parent = match template {
                    Some(target) => Some(target.parent()),
                    None => self.parent_for(entity_type, None),
                };
                CanonicalEvent::deleted(entity_type, ids)
                    .map_err(|source| AdaptError::shape(self.wire_type, source))?
                    .with_parent(parent)
            }
        };
        Ok(self.finish(event))
    }

    fn ids(&self, data: &Map<String, Value>) -> Result<Vec<String>, AdaptError> {
        ids_field(data)
            .ok_or_else(|| AdaptError::malformed(self.wire_type, "missing data.ids"))?
            .map_err(|source| AdaptError::shape(self.wire_type, source))
    }

    /// `table_id` (envelope, `data`, then payload), else `table_name`.
    pub fn table_ref(&self, payload: Option<&Record>) -> Option<TableRef> {
        if let Some(parent) = self.parent_for(EntityType::TableRecord, payload) {
            return Some(TableRef::Id(parent.id));
        }
        let data = self.data.and_then(Value::as_object);
        [Some(self.fields), data, payload]
            .into_iter()
            .flatten()
            .find_map(|object| string_field(object, TABLE_NAME_FIELD))
            .map(|table_name| TableRef::Name(table_name.to_string()))
    }

    /// Resolves the template owner from the envelope, then builds the
    /// standard event against it.
    pub fn template_event(
        &self,
        scope: TemplateScope,
        action: Action,
    ) -> Result<CanonicalEvent, AdaptError> {
        let target = resolve_template_target(self.fields)
            .ok_or_else(|| AdaptError::TemplateTargetMissing(self.wire_type.to_string()))?;
        if target.is_ambiguous() {
            warn!(
                wire_type = self.wire_type,
                selected = target.owner.as_str(),
                candidates = ?target.candidates,
                "template event names several owners; using priority order"
            );
        }
        let entity_type = match scope {
            TemplateScope::Template => EntityType::Template(target.owner),
            TemplateScope::Version => EntityType::TemplateVersion(target.owner),
        };
        self.standard_event(entity_type, action, Some(&target))
    }
}

pub(crate) fn object_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Record> {
    object.get(key).and_then(Value::as_object)
}

pub(crate) fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// `data.ids`, falling back to a single `data.id`. `None` when neither is
/// present.
pub(crate) fn ids_field(
    data: &Map<String, Value>,
) -> Option<Result<Vec<String>, EventShapeError>> {
    if let Some(ids) = data.get("ids").and_then(Value::as_array) {
        return Some(id_list(ids));
    }
    data.get("id").and_then(id_from_value).map(|id| Ok(vec![id]))
}

/// Every entry must be a non-blank string or a number.
pub(crate) fn id_list(ids: &[Value]) -> Result<Vec<String>, EventShapeError> {
    ids.iter()
        .map(|id| id_from_value(id).ok_or(EventShapeError::BlankId))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Envelope, TableRef, ids_field};
    use crate::error::{AdaptError, EventShapeError};
    use crate::event::{Action, EntityType, SourceFormat};

    #[test]
    fn envelope_requires_object_with_type() {
        assert!(matches!(
            Envelope::parse(&json!([1, 2]), 0, SourceFormat::Legacy),
            Err(AdaptError::NotAnObject)
        ));
        assert!(matches!(
            Envelope::parse(&json!({"data": {}}), 0, SourceFormat::Legacy),
            Err(AdaptError::MissingType)
        ));
    }

    #[test]
    fn ids_fall_back_to_single_id() {
        let data = json!({"id": "b1"});
        let ids = data.as_object().and_then(ids_field);
        assert_eq!(ids, Some(Ok(vec!["b1".to_string()])));
    }

    #[test]
    fn one_blank_id_rejects_the_whole_list() {
        let data = json!({"ids": ["w1", ""]});
        assert_eq!(
            data.as_object().and_then(ids_field),
            Some(Err(EventShapeError::BlankId))
        );
        let data = json!({"ids": ["w1", {"id": "w2"}]});
        assert_eq!(
            data.as_object().and_then(ids_field),
            Some(Err(EventShapeError::BlankId))
        );

        let frame = json!({"type": "WorkflowDelete", "data": {"ids": ["w1", "  "]}});
        let Ok(envelope) = Envelope::parse(&frame, 0, SourceFormat::Legacy) else {
            assert!(false, "envelope should parse");
            return;
        };
        assert!(matches!(
            envelope.standard_event(EntityType::Workflow, Action::Deleted, None),
            Err(AdaptError::Shape {
                source: EventShapeError::BlankId,
                ..
            })
        ));
    }

    #[test]
    fn table_ref_prefers_id_over_name() {
        let frame = json!({
            "type": "table_record.updated",
            "data": {"table_name": "orders", "ids": [1], "changes": {"table_id": "tb1"}}
        });
        let Ok(envelope) = Envelope::parse(&frame, 0, SourceFormat::Current) else {
            assert!(false, "envelope should parse");
            return;
        };
        let changes = frame["data"]["changes"].as_object();
        assert_eq!(envelope.table_ref(changes), Some(TableRef::Id("tb1".to_string())));
        assert_eq!(envelope.table_ref(None), Some(TableRef::Name("orders".to_string())));
    }

    #[test]
    fn parent_is_found_inside_attributes_when_envelope_lacks_it() {
        let frame = json!({
            "type": "TableNew",
            "data": {"attributes": {"id": "t1", "base_id": "base-9"}}
        });
        let envelope = Envelope::parse(&frame, 5, SourceFormat::Legacy);
        let Ok(envelope) = envelope else {
            assert!(false, "envelope should parse");
            return;
        };
        let event = envelope.standard_event(EntityType::Table, Action::Created, None);
        let Ok(event) = event else {
            assert!(false, "table creation should adapt");
            return;
        };
        assert_eq!(event.parent.map(|parent| parent.id), Some("base-9".to_string()));
        assert_eq!(event.received_at_ms, 5);
    }

    #[test]
    fn envelope_parent_wins_over_payload() {
        let frame = json!({
            "type": "AltanerComponentUpdate",
            "altaner_id": "alt-envelope",
            "data": {"ids": ["c1"], "changes": {"altaner_id": "alt-payload"}}
        });
        let envelope = Envelope::parse(&frame, 0, SourceFormat::Legacy);
        let Ok(envelope) = envelope else {
            assert!(false, "envelope should parse");
            return;
        };
        let event = envelope.standard_event(EntityType::AltanerComponent, Action::Updated, None);
        let parent = event.ok().and_then(|value| value.parent);
        assert_eq!(parent.map(|parent| parent.id), Some("alt-envelope".to_string()));
    }
}
