//! Legacy flat-type (`{type, data}`) adapter.
//!
//! Legacy type strings are `<Stem><Suffix>`: the suffix (`New`, `Create`,
//! `Update`, `Delete`) names the action and the stem is looked up in a fixed
//! table. Several stems collapse onto one entity type (every module flavour
//! becomes `module`). A few chat types (`ThreadOpened`, `RoomMemberJoined`,
//! ...) do not follow the suffix scheme and are listed verbatim. Template,
//! file, record-batch, thread and execution stems carry their own payload
//! rules.

use serde_json::Value;
use tracing::{debug, warn};

use crate::effects::{Adaptation, SideEffect};
use crate::error::{AdaptError, EventShapeError};
use crate::event::{
    Action, CanonicalEvent, EntityType, ParentRef, Record, SourceFormat, TABLE_NAME_FIELD,
    TemplateScope, id_from_value,
};
use crate::wire::{Envelope, TableRef, id_list, string_field};

/// Known legacy stems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyStem {
    Action,
    Search,
    Internal,
    Aggregator,
    Repeater,
    Iterator,
    Trigger,
    Router,
    Module,
    RouteCondition,
    Tool,
    Workflow,
    FlowExecution,
    ModuleExecution,
    Webhook,
    WebhookSubscription,
    Connection,
    Form,
    Notification,
    Altaner,
    AltanerComponent,
    Subscription,
    SubscriptionPlan,
    SubscriptionPlanGroup,
    Base,
    Table,
    Field,
    Records,
    Interface,
    Deployment,
    Commit,
    File,
    Template,
    TemplateVersion,
    Room,
    RoomMember,
    Thread,
    ThreadRead,
    ThreadTask,
    Message,
    MessageReaction,
    Task,
    AuthorizationRequest,
}

const STEMS: &[(&str, LegacyStem)] = &[
    ("Action", LegacyStem::Action),
    ("Search", LegacyStem::Search),
    ("Internal", LegacyStem::Internal),
    ("Aggregator", LegacyStem::Aggregator),
    ("Repeater", LegacyStem::Repeater),
    ("Iterator", LegacyStem::Iterator),
    ("Trigger", LegacyStem::Trigger),
    ("Router", LegacyStem::Router),
    ("Module", LegacyStem::Module),
    ("RouteCondition", LegacyStem::RouteCondition),
    ("Tool", LegacyStem::Tool),
    ("Workflow", LegacyStem::Workflow),
    ("FlowExecution", LegacyStem::FlowExecution),
    ("ModuleExecution", LegacyStem::ModuleExecution),
    ("Webhook", LegacyStem::Webhook),
    ("WebhookSubscription", LegacyStem::WebhookSubscription),
    ("Connection", LegacyStem::Connection),
    ("Form", LegacyStem::Form),
    ("Notification", LegacyStem::Notification),
    ("Altaner", LegacyStem::Altaner),
    ("AltanerComponent", LegacyStem::AltanerComponent),
    ("Subscription", LegacyStem::Subscription),
    ("SubscriptionPlan", LegacyStem::SubscriptionPlan),
    ("SubscriptionPlanGroup", LegacyStem::SubscriptionPlanGroup),
    ("Base", LegacyStem::Base),
    ("Table", LegacyStem::Table),
    ("Field", LegacyStem::Field),
    ("Records", LegacyStem::Records),
    ("Interface", LegacyStem::Interface),
    ("Deployment", LegacyStem::Deployment),
    ("Commit", LegacyStem::Commit),
    ("File", LegacyStem::File),
    ("Template", LegacyStem::Template),
    ("TemplateVersion", LegacyStem::TemplateVersion),
    ("Room", LegacyStem::Room),
    ("RoomMember", LegacyStem::RoomMember),
    ("Thread", LegacyStem::Thread),
    ("ThreadTask", LegacyStem::ThreadTask),
    ("Message", LegacyStem::Message),
    ("MessageReaction", LegacyStem::MessageReaction),
    ("Task", LegacyStem::Task),
    ("AuthorizationRequest", LegacyStem::AuthorizationRequest),
];

/// Types outside the `<Stem><Suffix>` scheme.
const IRREGULAR_TYPES: &[(&str, LegacyStem, Action)] = &[
    ("RoomMemberJoined", LegacyStem::RoomMember, Action::Created),
    ("ThreadOpened", LegacyStem::Thread, Action::Created),
    ("ThreadRead", LegacyStem::ThreadRead, Action::Updated),
    ("TaskStarted", LegacyStem::Task, Action::Created),
    ("MESSAGE", LegacyStem::Message, Action::Created),
];

/// Recognised types that intentionally produce no event: billing, and the
/// agent response stream, which renders outside the store.
const IGNORED_TYPES: &[&str] = &[
    "SubscriptionPlanBilling",
    "AGENT_RESPONSE",
    "TASK_EVENT",
    "StreamingMessageStart",
    "StreamingMessageEnd",
    "StreamingMessageDataReceived",
    "StreamingMessageError",
    "MessageReactionDelete",
    "MessageMediaAdded",
    "CreditsNotEnough",
];

const SUFFIXES: [(&str, Action); 4] = [
    ("New", Action::Created),
    ("Create", Action::Created),
    ("Update", Action::Updated),
    ("Delete", Action::Deleted),
];

/// Payload rule a stem is adapted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StemTarget {
    Entity(EntityType),
    ModuleExecution,
    RecordBatch,
    File,
    Template(TemplateScope),
    ThreadRead,
    /// `data` is the record itself for every action.
    InlineRecord(EntityType),
}

impl LegacyStem {
    #[must_use]
    pub fn parse(stem: &str) -> Option<Self> {
        STEMS
            .iter()
            .find(|(name, _)| *name == stem)
            .map(|(_, stem)| *stem)
    }

    fn target(self) -> StemTarget {
        match self {
            Self::Action
            | Self::Search
            | Self::Internal
            | Self::Aggregator
            | Self::Repeater
            | Self::Iterator
            | Self::Trigger
            | Self::Router
            | Self::Module => StemTarget::Entity(EntityType::Module),
            Self::RouteCondition => StemTarget::Entity(EntityType::RouteCondition),
            Self::Tool => StemTarget::Entity(EntityType::Tool),
            Self::Workflow => StemTarget::Entity(EntityType::Workflow),
            Self::FlowExecution => StemTarget::Entity(EntityType::FlowExecution),
            Self::ModuleExecution => StemTarget::ModuleExecution,
            Self::Webhook => StemTarget::Entity(EntityType::Webhook),
            Self::WebhookSubscription => StemTarget::Entity(EntityType::WebhookSubscription),
            Self::Connection => StemTarget::Entity(EntityType::Connection),
            Self::Form => StemTarget::Entity(EntityType::Form),
            Self::Notification => StemTarget::Entity(EntityType::Notification),
            Self::Altaner => StemTarget::Entity(EntityType::Altaner),
            Self::AltanerComponent => StemTarget::Entity(EntityType::AltanerComponent),
            Self::Subscription => StemTarget::Entity(EntityType::Subscription),
            Self::SubscriptionPlan => StemTarget::Entity(EntityType::SubscriptionPlan),
            Self::SubscriptionPlanGroup => StemTarget::Entity(EntityType::SubscriptionPlanGroup),
            Self::Base => StemTarget::Entity(EntityType::Base),
            Self::Table => StemTarget::Entity(EntityType::Table),
            Self::Field => StemTarget::Entity(EntityType::Field),
            Self::Records => StemTarget::RecordBatch,
            Self::Interface => StemTarget::Entity(EntityType::Interface),
            Self::Deployment => StemTarget::Entity(EntityType::Deployment),
            Self::Commit => StemTarget::Entity(EntityType::Commit),
            Self::File => StemTarget::File,
            Self::Template => StemTarget::Template(TemplateScope::Template),
            Self::TemplateVersion => StemTarget::Template(TemplateScope::Version),
            Self::Room => StemTarget::Entity(EntityType::Room),
            Self::RoomMember => StemTarget::Entity(EntityType::RoomMember),
            Self::Thread => StemTarget::Entity(EntityType::Thread),
            Self::ThreadRead => StemTarget::ThreadRead,
            Self::ThreadTask => StemTarget::InlineRecord(EntityType::ThreadTask),
            Self::Message => StemTarget::Entity(EntityType::Message),
            Self::MessageReaction => StemTarget::Entity(EntityType::MessageReaction),
            Self::Task => StemTarget::Entity(EntityType::Task),
            Self::AuthorizationRequest => StemTarget::Entity(EntityType::AuthorizationRequest),
        }
    }
}

/// Resolves a wire type to its stem and action, irregular names first.
#[must_use]
pub fn resolve_legacy_type(wire_type: &str) -> Option<(LegacyStem, Action)> {
    if let Some((_, stem, action)) = IRREGULAR_TYPES.iter().find(|(name, ..)| *name == wire_type) {
        return Some((*stem, *action));
    }
    let (stem, action) = split_legacy_type(wire_type)?;
    LegacyStem::parse(stem).map(|stem| (stem, action))
}

/// Splits `WorkflowUpdate` into (`Workflow`, updated).
#[must_use]
pub fn split_legacy_type(wire_type: &str) -> Option<(&str, Action)> {
    SUFFIXES.iter().find_map(|(suffix, action)| {
        wire_type
            .strip_suffix(suffix)
            .filter(|stem| !stem.is_empty())
            .map(|stem| (stem, *action))
    })
}

/// Adapts one legacy frame. Never panics; rejected frames and entries are
/// logged and returned in [`Adaptation::rejected`].
#[must_use]
pub fn adapt_legacy(frame: &Value, received_at_ms: u64) -> Adaptation {
    let adaptation = match Envelope::parse(frame, received_at_ms, SourceFormat::Legacy) {
        Ok(envelope) => adapt_envelope(&envelope),
        Err(error) => Adaptation::rejected(error),
    };
    for error in &adaptation.rejected {
        warn!(reason = %error, "dropping legacy event");
    }
    adaptation
}

fn adapt_envelope(envelope: &Envelope<'_>) -> Adaptation {
    let wire_type = envelope.wire_type;
    if IGNORED_TYPES.contains(&wire_type) {
        debug!(wire_type, "legacy event has no store projection");
        return Adaptation::ignored();
    }
    let Some((stem, action)) = resolve_legacy_type(wire_type) else {
        return Adaptation::rejected(AdaptError::UnknownType(wire_type.to_string()));
    };

    match stem.target() {
        StemTarget::Entity(entity_type) => {
            Adaptation::from_result(envelope.standard_event(entity_type, action, None))
        }
        StemTarget::ModuleExecution => match action {
            Action::Deleted => Adaptation::from_result(envelope.standard_event(
                EntityType::ModuleExecution,
                action,
                None,
            )),
            Action::Created | Action::Updated => {
                Adaptation::from_result(module_execution_event(envelope))
            }
        },
        StemTarget::RecordBatch => record_batch(envelope, action),
        StemTarget::File => file_event(envelope, action),
        StemTarget::Template(scope) => {
            Adaptation::from_result(envelope.template_event(scope, action))
        }
        StemTarget::ThreadRead => Adaptation::from_result(thread_read_event(envelope)),
        StemTarget::InlineRecord(entity_type) => {
            Adaptation::from_result(inline_record_event(envelope, entity_type, action))
        }
    }
}

fn inline_record_event(
    envelope: &Envelope<'_>,
    entity_type: EntityType,
    action: Action,
) -> Result<CanonicalEvent, AdaptError> {
    let data = envelope.data_object()?;
    let id = data
        .get("id")
        .and_then(id_from_value)
        .ok_or_else(|| AdaptError::malformed(envelope.wire_type, "missing data.id"))?;
    let event = match action {
        Action::Created => CanonicalEvent::created(entity_type, data.clone()),
        Action::Updated => CanonicalEvent::updated(entity_type, vec![id], data.clone()),
        Action::Deleted => CanonicalEvent::deleted(entity_type, vec![id]),
    }
    .map_err(|source| AdaptError::shape(envelope.wire_type, source))?
    .with_parent(envelope.parent_for(entity_type, Some(data)));
    Ok(envelope.finish(event))
}

/// Read markers arrive either as `{ids: ["<thread>_<member>"], changes:
/// {timestamp}}` or as `{attributes: {thread_id, member_id, timestamp}}`.
fn thread_read_event(envelope: &Envelope<'_>) -> Result<CanonicalEvent, AdaptError> {
    let wire_type = envelope.wire_type;
    let data = envelope.data_object()?;
    let (thread_id, member_id, timestamp) = if let Some(ids) = data.get("ids") {
        let marker = ids
            .as_array()
            .and_then(|ids| ids.first())
            .and_then(id_from_value)
            .ok_or_else(|| AdaptError::malformed(wire_type, "missing data.ids"))?;
        let (thread_id, member_id) = marker
            .split_once('_')
            .ok_or_else(|| AdaptError::malformed(wire_type, "read marker is not thread_member"))?;
        let timestamp = data.get("changes").and_then(|changes| changes.get("timestamp"));
        (thread_id.to_string(), member_id.to_string(), timestamp)
    } else {
        let attributes = data
            .get("attributes")
            .and_then(Value::as_object)
            .ok_or_else(|| AdaptError::malformed(wire_type, "missing data.attributes"))?;
        let field = |key: &str| {
            attributes.get(key).and_then(id_from_value).ok_or_else(|| {
                AdaptError::malformed(wire_type, format!("missing attributes.{key}"))
            })
        };
        (field("thread_id")?, field("member_id")?, attributes.get("timestamp"))
    };

    let mut changes = Record::new();
    changes.insert("thread_id".to_string(), Value::String(thread_id.clone()));
    changes.insert("member_id".to_string(), Value::String(member_id.clone()));
    changes.insert(
        "timestamp".to_string(),
        timestamp.cloned().unwrap_or(Value::Null),
    );
    let event = CanonicalEvent::updated(
        EntityType::ThreadReadState,
        vec![format!("{thread_id}_{member_id}")],
        changes,
    )
    .map_err(|source| AdaptError::shape(wire_type, source))?
    .with_parent(Some(ParentRef {
        field: "thread_id",
        id: thread_id,
    }));
    Ok(envelope.finish(event))
}

/// Module execution frames carry the execution record itself as `data`.
fn module_execution_event(envelope: &Envelope<'_>) -> Result<CanonicalEvent, AdaptError> {
    let data = envelope.data_object()?;
    let id = data
        .get("id")
        .and_then(id_from_value)
        .ok_or_else(|| AdaptError::malformed(envelope.wire_type, "missing data.id"))?;
    let mut changes = data.clone();
    if let Some(timestamp) = envelope.fields.get("timestamp").filter(|value| !value.is_null()) {
        changes.insert("timestamp".to_string(), timestamp.clone());
    }
    let parent = envelope.parent_for(EntityType::ModuleExecution, Some(&changes));
    let event = CanonicalEvent::updated(EntityType::ModuleExecution, vec![id], changes)
        .map_err(|source| AdaptError::shape(envelope.wire_type, source))?
        .with_parent(parent);
    Ok(envelope.finish(event))
}

/// Record batches are keyed per table; ids are rekeyed once the table is
/// known, which for name-only frames happens in the session.
fn record_batch(envelope: &Envelope<'_>, action: Action) -> Adaptation {
    let wire_type = envelope.wire_type;
    let data = match envelope.data_object() {
        Ok(data) => data,
        Err(error) => return Adaptation::rejected(error),
    };
    let table_name = string_field(data, TABLE_NAME_FIELD);
    let table = ["table_id", "id"]
        .into_iter()
        .find_map(|key| data.get(key).and_then(id_from_value))
        .map(TableRef::Id)
        .or_else(|| table_name.map(|name| TableRef::Name(name.to_string())));
    let Some(table) = table else {
        return Adaptation::rejected(AdaptError::malformed(
            wire_type,
            "missing data.table_id and data.table_name",
        ));
    };

    if action == Action::Deleted {
        let Some(ids) = data.get("ids").and_then(Value::as_array) else {
            return Adaptation::rejected(AdaptError::malformed(wire_type, "missing data.ids"));
        };
        return Adaptation::from_result(
            id_list(ids)
                .and_then(|ids| CanonicalEvent::deleted(EntityType::TableRecord, ids))
                .map(|event| envelope.finish(table.scope(event)))
                .map_err(|source| AdaptError::shape(wire_type, source)),
        );
    }

    let Some(records) = data.get("records").and_then(Value::as_array) else {
        return Adaptation::rejected(AdaptError::malformed(wire_type, "missing data.records"));
    };
    let mut adaptation = Adaptation::default();
    for (index, entry) in records.iter().enumerate() {
        let Some(record) = entry.as_object() else {
            adaptation.rejected.push(AdaptError::malformed(
                wire_type,
                format!("records[{index}] is not an object"),
            ));
            continue;
        };
        let mut record = record.clone();
        if let TableRef::Id(table_id) = &table {
            record
                .entry("table_id")
                .or_insert_with(|| Value::String(table_id.clone()));
        }
        if let Some(table_name) = table_name {
            record
                .entry(TABLE_NAME_FIELD)
                .or_insert_with(|| Value::String(table_name.to_string()));
        }
        let built = match action {
            Action::Created => CanonicalEvent::created(EntityType::TableRecord, record),
            _ => record
                .get("id")
                .and_then(id_from_value)
                .ok_or(EventShapeError::MissingId)
                .and_then(|id| CanonicalEvent::updated(EntityType::TableRecord, vec![id], record)),
        };
        match built {
            Ok(event) => adaptation.events.push(envelope.finish(table.scope(event))),
            Err(source) => adaptation.rejected.push(AdaptError::shape(wire_type, source)),
        }
    }
    adaptation
}

fn file_event(envelope: &Envelope<'_>, action: Action) -> Adaptation {
    let wire_type = envelope.wire_type;
    let mut adaptation = Adaptation {
        marks_unsaved_remote_changes: true,
        ..Adaptation::default()
    };
    let data = match envelope.data_object() {
        Ok(data) => data,
        Err(error) => {
            adaptation.rejected.push(error);
            return adaptation;
        }
    };
    let interface_id = envelope.fields.get("interface_id").and_then(id_from_value);

    match action {
        Action::Updated => {
            let Some(updates) = data.get("updates").and_then(Value::as_array) else {
                adaptation
                    .rejected
                    .push(AdaptError::malformed(wire_type, "missing data.updates"));
                return adaptation;
            };
            for (index, update) in updates.iter().enumerate() {
                match file_update_event(envelope, index, update) {
                    Ok(event) => adaptation.events.push(event),
                    Err(error) => adaptation.rejected.push(error),
                }
            }
        }
        Action::Created => {
            let Some(path) = string_field(data, "file_name") else {
                adaptation
                    .rejected
                    .push(AdaptError::malformed(wire_type, "missing data.file_name"));
                return adaptation;
            };
            let mut attributes = Record::new();
            attributes.insert("id".to_string(), Value::String(path.to_string()));
            attributes.insert("path".to_string(), Value::String(path.to_string()));
            attributes.insert("content".to_string(), Value::String(String::new()));
            match CanonicalEvent::created(EntityType::File, attributes) {
                Ok(event) => adaptation.events.push(envelope.finish(event)),
                Err(source) => adaptation.rejected.push(AdaptError::shape(wire_type, source)),
            }
            adaptation
                .effects
                .push(SideEffect::RefreshFileTree { interface_id });
        }
        Action::Deleted => {
            let Some(path) = string_field(data, "file_name") else {
                adaptation
                    .rejected
                    .push(AdaptError::malformed(wire_type, "missing data.file_name"));
                return adaptation;
            };
            match CanonicalEvent::deleted(EntityType::File, vec![path.to_string()]) {
                Ok(event) => adaptation.events.push(envelope.finish(event)),
                Err(source) => adaptation.rejected.push(AdaptError::shape(wire_type, source)),
            }
            adaptation.effects.push(SideEffect::CloseFile {
                path: path.to_string(),
            });
            adaptation
                .effects
                .push(SideEffect::RefreshFileTree { interface_id });
        }
    }
    adaptation
}

fn file_update_event(
    envelope: &Envelope<'_>,
    index: usize,
    update: &Value,
) -> Result<CanonicalEvent, AdaptError> {
    let wire_type = envelope.wire_type;
    let update = update.as_object().ok_or_else(|| {
        AdaptError::malformed(wire_type, format!("updates[{index}] is not an object"))
    })?;
    let path = string_field(update, "file_name").ok_or_else(|| {
        AdaptError::malformed(wire_type, format!("updates[{index}] missing file_name"))
    })?;
    let content = update
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AdaptError::malformed(wire_type, format!("updates[{index}] missing content"))
        })?;

    let mut changes = Record::new();
    changes.insert("path".to_string(), Value::String(path.to_string()));
    changes.insert("content".to_string(), Value::String(content.to_string()));
    let event = CanonicalEvent::updated(EntityType::File, vec![path.to_string()], changes)
        .map_err(|source| AdaptError::shape(wire_type, source))?;
    Ok(envelope.finish(event))
}
