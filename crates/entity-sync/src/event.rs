//! Canonical event model shared by every wire adapter.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EventShapeError;

/// A stored entity record: a JSON object keyed by field name.
pub type Record = Map<String, Value>;

/// Aggregate a template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOwner {
    Flow,
    Altaner,
    Agent,
    Form,
    Gate,
}

impl TemplateOwner {
    /// Resolution priority used when a template envelope names several owners.
    pub const PRIORITY: [Self; 5] = [
        Self::Flow,
        Self::Altaner,
        Self::Agent,
        Self::Form,
        Self::Gate,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Altaner => "altaner",
            Self::Agent => "agent",
            Self::Form => "form",
            Self::Gate => "gate",
        }
    }

    /// Envelope field carrying the owner id.
    #[must_use]
    pub fn id_field(&self) -> &'static str {
        match self {
            Self::Flow => "flow_id",
            Self::Altaner => "altaner_id",
            Self::Agent => "agent_id",
            Self::Form => "form_id",
            Self::Gate => "gate_id",
        }
    }
}

/// Whether a template event targets the template itself or one of its versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateScope {
    Template,
    Version,
}

/// Closed set of entity types the store keeps tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Altaner,
    AltanerComponent,
    Workflow,
    Module,
    RouteCondition,
    Tool,
    FlowExecution,
    ModuleExecution,
    /// Denormalized per-workflow execution list used by dashboard widgets.
    WorkflowExecution,
    Webhook,
    WebhookSubscription,
    Connection,
    Form,
    Notification,
    Subscription,
    SubscriptionPlan,
    SubscriptionPlanGroup,
    Base,
    Table,
    Field,
    TableRecord,
    Interface,
    Deployment,
    Commit,
    Template(TemplateOwner),
    TemplateVersion(TemplateOwner),
    File,
    Room,
    RoomMember,
    Thread,
    /// Per-member read marker; projected onto the thread's `read_state`.
    ThreadReadState,
    ThreadTask,
    Message,
    MessageReaction,
    /// Agent task run attached to a message.
    Task,
    AuthorizationRequest,
}

/// How a table orders its id list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrder {
    Insertion,
    NewestFirst,
}

impl EntityType {
    const PLAIN: [Self; 34] = [
        Self::Altaner,
        Self::AltanerComponent,
        Self::Workflow,
        Self::Module,
        Self::RouteCondition,
        Self::Tool,
        Self::FlowExecution,
        Self::ModuleExecution,
        Self::WorkflowExecution,
        Self::Webhook,
        Self::WebhookSubscription,
        Self::Connection,
        Self::Form,
        Self::Notification,
        Self::Subscription,
        Self::SubscriptionPlan,
        Self::SubscriptionPlanGroup,
        Self::Base,
        Self::Table,
        Self::Field,
        Self::TableRecord,
        Self::Interface,
        Self::Deployment,
        Self::Commit,
        Self::File,
        Self::Room,
        Self::RoomMember,
        Self::Thread,
        Self::ThreadReadState,
        Self::ThreadTask,
        Self::Message,
        Self::MessageReaction,
        Self::Task,
        Self::AuthorizationRequest,
    ];

    /// Every entity type, template kinds expanded per owner.
    #[must_use]
    pub fn all() -> Vec<Self> {
        let mut all = Self::PLAIN.to_vec();
        for owner in TemplateOwner::PRIORITY {
            all.push(Self::Template(owner));
            all.push(Self::TemplateVersion(owner));
        }
        all
    }

    /// Name used by the dotted `entity.action` wire format.
    ///
    /// Template kinds share the `template` / `template_version` names; their
    /// owner comes from the envelope.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Altaner => "altaner",
            Self::AltanerComponent => "altaner_component",
            Self::Workflow => "workflow",
            Self::Module => "module",
            Self::RouteCondition => "route_condition",
            Self::Tool => "tool",
            Self::FlowExecution => "flow_execution",
            Self::ModuleExecution => "module_execution",
            Self::WorkflowExecution => "workflow_execution",
            Self::Webhook => "webhook",
            Self::WebhookSubscription => "webhook_subscription",
            Self::Connection => "connection",
            Self::Form => "form",
            Self::Notification => "notification",
            Self::Subscription => "subscription",
            Self::SubscriptionPlan => "subscription_plan",
            Self::SubscriptionPlanGroup => "subscription_plan_group",
            Self::Base => "base",
            Self::Table => "table",
            Self::Field => "field",
            Self::TableRecord => "table_record",
            Self::Interface => "interface",
            Self::Deployment => "deployment",
            Self::Commit => "commit",
            Self::Template(_) => "template",
            Self::TemplateVersion(_) => "template_version",
            Self::File => "file",
            Self::Room => "room",
            Self::RoomMember => "room_member",
            Self::Thread => "thread",
            Self::ThreadReadState => "thread_read_state",
            Self::ThreadTask => "thread_task",
            Self::Message => "message",
            Self::MessageReaction => "message_reaction",
            Self::Task => "task",
            Self::AuthorizationRequest => "authorization_request",
        }
    }

    /// Resolves a non-template wire name.
    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::PLAIN
            .into_iter()
            .find(|entity_type| entity_type.wire_name() == name)
    }

    #[must_use]
    pub fn id_order(&self) -> IdOrder {
        match self {
            Self::WorkflowExecution | Self::Notification => IdOrder::NewestFirst,
            _ => IdOrder::Insertion,
        }
    }

    /// Field naming the owning aggregate, stamped into inserted records.
    #[must_use]
    pub fn parent_field(&self) -> Option<&'static str> {
        match self {
            Self::AltanerComponent => Some("altaner_id"),
            Self::Module | Self::FlowExecution | Self::WorkflowExecution => Some("workflow_id"),
            Self::RouteCondition => Some("router_id"),
            Self::ModuleExecution => Some("execution_id"),
            Self::WebhookSubscription => Some("trigger_id"),
            Self::Table => Some("base_id"),
            Self::Field | Self::TableRecord => Some("table_id"),
            Self::Deployment | Self::Commit => Some("interface_id"),
            Self::RoomMember | Self::Thread | Self::AuthorizationRequest => Some("room_id"),
            Self::ThreadReadState | Self::Message => Some("thread_id"),
            Self::ThreadTask => Some("mainthread_id"),
            Self::MessageReaction | Self::Task => Some("message_id"),
            Self::Template(owner) | Self::TemplateVersion(owner) => Some(owner.id_field()),
            _ => None,
        }
    }

    #[must_use]
    pub fn template_scope(&self) -> Option<(TemplateScope, TemplateOwner)> {
        match self {
            Self::Template(owner) => Some((TemplateScope::Template, *owner)),
            Self::TemplateVersion(owner) => Some((TemplateScope::Version, *owner)),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(owner) => write!(f, "{}_template", owner.as_str()),
            Self::TemplateVersion(owner) => write!(f, "{}_template_version", owner.as_str()),
            other => f.write_str(other.wire_name()),
        }
    }
}

impl Serialize for EntityType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

impl Action {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Legacy,
    Current,
}

/// Owning aggregate of an event target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub field: &'static str,
    pub id: String,
}

/// Payload by action; deletes carry nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Created(Record),
    Updated(Record),
    Deleted,
}

/// One normalized change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub entity_type: EntityType,
    pub ids: Vec<String>,
    pub payload: EventPayload,
    pub parent: Option<ParentRef>,
    pub origin_actor_id: Option<String>,
    pub received_at_ms: u64,
    pub source_format: SourceFormat,
    pub wire_type: String,
}

impl CanonicalEvent {
    /// Builds a creation event; the id comes from `attributes.id`.
    pub fn created(entity_type: EntityType, attributes: Record) -> Result<Self, EventShapeError> {
        let id = attributes
            .get("id")
            .and_then(id_from_value)
            .ok_or(EventShapeError::MissingId)?;
        Ok(Self::new(entity_type, vec![id], EventPayload::Created(attributes)))
    }

    pub fn updated(
        entity_type: EntityType,
        ids: Vec<String>,
        changes: Record,
    ) -> Result<Self, EventShapeError> {
        validate_ids(&ids)?;
        Ok(Self::new(entity_type, ids, EventPayload::Updated(changes)))
    }

    pub fn deleted(entity_type: EntityType, ids: Vec<String>) -> Result<Self, EventShapeError> {
        validate_ids(&ids)?;
        Ok(Self::new(entity_type, ids, EventPayload::Deleted))
    }

    fn new(entity_type: EntityType, ids: Vec<String>, payload: EventPayload) -> Self {
        Self {
            entity_type,
            ids,
            payload,
            parent: None,
            origin_actor_id: None,
            received_at_ms: 0,
            source_format: SourceFormat::Current,
            wire_type: String::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Option<ParentRef>) -> Self {
        self.parent = parent;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin_actor_id: Option<String>) -> Self {
        self.origin_actor_id = origin_actor_id.filter(|actor| !actor.trim().is_empty());
        self
    }

    #[must_use]
    pub fn received_at(mut self, received_at_ms: u64) -> Self {
        self.received_at_ms = received_at_ms;
        self
    }

    #[must_use]
    pub fn from_wire(mut self, source_format: SourceFormat, wire_type: &str) -> Self {
        self.source_format = source_format;
        self.wire_type = wire_type.to_string();
        self
    }

    #[must_use]
    pub fn action(&self) -> Action {
        match self.payload {
            EventPayload::Created(_) => Action::Created,
            EventPayload::Updated(_) => Action::Updated,
            EventPayload::Deleted => Action::Deleted,
        }
    }

    #[must_use]
    pub fn attributes(&self) -> Option<&Record> {
        match &self.payload {
            EventPayload::Created(attributes) => Some(attributes),
            _ => None,
        }
    }

    #[must_use]
    pub fn changes(&self) -> Option<&Record> {
        match &self.payload {
            EventPayload::Updated(changes) => Some(changes),
            _ => None,
        }
    }

    #[must_use]
    pub fn template_scope(&self) -> Option<TemplateScope> {
        self.entity_type.template_scope().map(|(scope, _)| scope)
    }

    /// Rekeys table record ids as `{table_id}/{record_id}` and points the
    /// parent at the table.
    #[must_use]
    pub fn scoped_to_table(mut self, table_id: &str) -> Self {
        self.ids = self
            .ids
            .iter()
            .map(|record_id| table_record_key(table_id, record_id))
            .collect();
        self.parent = Some(ParentRef {
            field: "table_id",
            id: table_id.to_string(),
        });
        self
    }

    /// Table name of a table record event that arrived without a table id.
    #[must_use]
    pub fn unresolved_table_name(&self) -> Option<&str> {
        if self.entity_type != EntityType::TableRecord {
            return None;
        }
        self.parent
            .as_ref()
            .filter(|parent| parent.field == TABLE_NAME_FIELD)
            .map(|parent| parent.id.as_str())
    }
}

pub const TABLE_NAME_FIELD: &str = "table_name";

/// Store key of a table record. Record ids are only unique within a table.
#[must_use]
pub fn table_record_key(table_id: &str, record_id: &str) -> String {
    format!("{table_id}/{record_id}")
}

fn validate_ids(ids: &[String]) -> Result<(), EventShapeError> {
    if ids.is_empty() {
        return Err(EventShapeError::EmptyIds);
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(EventShapeError::BlankId);
    }
    Ok(())
}

/// Ids arrive as strings or integers on the wire.
#[must_use]
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Owner selected for a template envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateTarget {
    pub owner: TemplateOwner,
    pub owner_id: String,
    /// Every owner whose id field was present, in priority order.
    pub candidates: Vec<TemplateOwner>,
}

impl TemplateTarget {
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    #[must_use]
    pub fn parent(&self) -> ParentRef {
        ParentRef {
            field: self.owner.id_field(),
            id: self.owner_id.clone(),
        }
    }
}

/// Scans `flow_id`, `altaner_id`, `agent_id`, `form_id`, `gate_id` in priority
/// order; the first present field selects the owner.
#[must_use]
pub fn resolve_template_target(envelope: &Map<String, Value>) -> Option<TemplateTarget> {
    let present = TemplateOwner::PRIORITY
        .into_iter()
        .filter_map(|owner| {
            envelope
                .get(owner.id_field())
                .and_then(id_from_value)
                .map(|owner_id| (owner, owner_id))
        })
        .collect::<Vec<_>>();
    let (owner, owner_id) = present.first().cloned()?;
    Some(TemplateTarget {
        owner,
        owner_id,
        candidates: present.into_iter().map(|(owner, _)| owner).collect(),
    })
}
