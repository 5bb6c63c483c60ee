//! Static handler registry: `(entity type, action)` → ordered store mutations.
//!
//! Routing is an exhaustive match over [`EntityType`]; a new entity type does
//! not compile until it is routed here.

use serde::Serialize;
use serde_json::Value;

use crate::event::{Action, CanonicalEvent, EntityType, Record, TemplateOwner, id_from_value};
use crate::store::{MutationStatus, NormalizedStore};

pub const DEFAULT_WORKFLOW_EXECUTION_CAP: usize = 100;

/// Settings handlers read while applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerContext {
    /// Per-workflow limit of the execution list; `0` disables the cap.
    pub workflow_execution_cap: usize,
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self {
            workflow_execution_cap: DEFAULT_WORKFLOW_EXECUTION_CAP,
        }
    }
}

/// One store write performed by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMutation {
    pub handler: &'static str,
    pub entity_type: EntityType,
    pub id: String,
    pub status: MutationStatus,
}

pub type MutationFn =
    fn(&mut NormalizedStore, &CanonicalEvent, &HandlerContext) -> Vec<AppliedMutation>;

#[derive(Debug, Clone, Copy)]
pub struct Handler {
    pub name: &'static str,
    pub apply: MutationFn,
}

const INSERT: &[Handler] = &[Handler {
    name: "insert",
    apply: insert,
}];
const MERGE: &[Handler] = &[Handler {
    name: "merge",
    apply: merge,
}];
const UPSERT: &[Handler] = &[Handler {
    name: "upsert",
    apply: upsert,
}];
const REMOVE: &[Handler] = &[Handler {
    name: "remove",
    apply: remove,
}];

const FLOW_EXECUTION_CREATED: &[Handler] = &[
    Handler {
        name: "flow_execution_insert",
        apply: flow_execution_insert,
    },
    Handler {
        name: "workflow_execution_insert",
        apply: workflow_execution_insert,
    },
];
const FLOW_EXECUTION_UPDATED: &[Handler] = &[
    Handler {
        name: "merge",
        apply: merge,
    },
    Handler {
        name: "workflow_execution_merge",
        apply: workflow_execution_merge,
    },
];
const FLOW_EXECUTION_DELETED: &[Handler] = &[
    Handler {
        name: "remove",
        apply: remove,
    },
    Handler {
        name: "workflow_execution_remove",
        apply: workflow_execution_remove,
    },
];
const WORKFLOW_EXECUTION_CREATED: &[Handler] = &[Handler {
    name: "workflow_execution_insert",
    apply: workflow_execution_insert,
}];
const MODULE_EXECUTION_UPSERT: &[Handler] = &[
    Handler {
        name: "upsert",
        apply: upsert,
    },
    Handler {
        name: "ensure_parent_execution",
        apply: ensure_parent_execution,
    },
];
const TOOL_UPDATED: &[Handler] = &[
    Handler {
        name: "merge",
        apply: merge,
    },
    Handler {
        name: "merge_module_tools",
        apply: merge_module_tools,
    },
];
const WORKFLOW_DELETED: &[Handler] = &[
    Handler {
        name: "remove",
        apply: remove,
    },
    Handler {
        name: "remove_workflow_executions",
        apply: remove_workflow_executions,
    },
];
const THREAD_READ_STATE: &[Handler] = &[Handler {
    name: "merge_thread_read_state",
    apply: merge_thread_read_state,
}];

fn standard(action: Action) -> &'static [Handler] {
    match action {
        Action::Created => INSERT,
        Action::Updated => MERGE,
        Action::Deleted => REMOVE,
    }
}

/// Handlers for `(entity_type, action)` in application order. An empty slice
/// is a registry miss.
#[must_use]
pub fn handlers_for(entity_type: EntityType, action: Action) -> &'static [Handler] {
    match entity_type {
        EntityType::FlowExecution => match action {
            Action::Created => FLOW_EXECUTION_CREATED,
            Action::Updated => FLOW_EXECUTION_UPDATED,
            Action::Deleted => FLOW_EXECUTION_DELETED,
        },
        EntityType::WorkflowExecution => match action {
            Action::Created => WORKFLOW_EXECUTION_CREATED,
            Action::Updated | Action::Deleted => standard(action),
        },
        EntityType::ModuleExecution => match action {
            Action::Created | Action::Updated => MODULE_EXECUTION_UPSERT,
            Action::Deleted => REMOVE,
        },
        EntityType::Tool => match action {
            Action::Updated => TOOL_UPDATED,
            Action::Created | Action::Deleted => standard(action),
        },
        EntityType::Workflow => match action {
            Action::Deleted => WORKFLOW_DELETED,
            Action::Created | Action::Updated => standard(action),
        },
        EntityType::File | EntityType::TableRecord => match action {
            Action::Updated => UPSERT,
            Action::Created | Action::Deleted => standard(action),
        },
        EntityType::ThreadReadState => match action {
            Action::Created | Action::Updated => THREAD_READ_STATE,
            Action::Deleted => &[],
        },
        EntityType::Template(owner) | EntityType::TemplateVersion(owner) => match owner {
            TemplateOwner::Flow | TemplateOwner::Altaner => standard(action),
            TemplateOwner::Agent | TemplateOwner::Form | TemplateOwner::Gate => &[],
        },
        EntityType::Altaner
        | EntityType::AltanerComponent
        | EntityType::Module
        | EntityType::RouteCondition
        | EntityType::Webhook
        | EntityType::WebhookSubscription
        | EntityType::Connection
        | EntityType::Form
        | EntityType::Notification
        | EntityType::Subscription
        | EntityType::SubscriptionPlan
        | EntityType::SubscriptionPlanGroup
        | EntityType::Base
        | EntityType::Table
        | EntityType::Field
        | EntityType::Interface
        | EntityType::Deployment
        | EntityType::Commit
        | EntityType::Room
        | EntityType::RoomMember
        | EntityType::Thread
        | EntityType::ThreadTask
        | EntityType::Message
        | EntityType::MessageReaction
        | EntityType::Task
        | EntityType::AuthorizationRequest => standard(action),
    }
}

/// Runs every handler registered for the event; `None` on a registry miss.
pub fn dispatch(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    context: &HandlerContext,
) -> Option<Vec<AppliedMutation>> {
    let handlers = handlers_for(event.entity_type, event.action());
    if handlers.is_empty() {
        return None;
    }
    Some(
        handlers
            .iter()
            .flat_map(|handler| (handler.apply)(store, event, context))
            .collect(),
    )
}

fn applied(
    handler: &'static str,
    entity_type: EntityType,
    id: &str,
    status: MutationStatus,
) -> AppliedMutation {
    AppliedMutation {
        handler,
        entity_type,
        id: id.to_string(),
        status,
    }
}

fn payload(event: &CanonicalEvent) -> Option<&Record> {
    event.attributes().or_else(|| event.changes())
}

/// Payload with the parent reference stamped in when the record lacks it.
fn stamped(event: &CanonicalEvent, record: &Record) -> Record {
    let mut record = record.clone();
    if let Some(parent) = &event.parent {
        record
            .entry(parent.field)
            .or_insert_with(|| Value::String(parent.id.clone()));
    }
    record
}

fn field_is(record: &Record, field: &str, id: &str) -> bool {
    record.get(field).and_then(id_from_value).as_deref() == Some(id)
}

fn insert(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(attributes) = event.attributes() else {
        return Vec::new();
    };
    event
        .ids
        .iter()
        .map(|id| {
            let status = store.upsert(event.entity_type, id, stamped(event, attributes));
            applied("insert", event.entity_type, id, status)
        })
        .collect()
}

fn merge(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(changes) = event.changes() else {
        return Vec::new();
    };
    event
        .ids
        .iter()
        .map(|id| {
            let status = store.merge(event.entity_type, id, changes);
            applied("merge", event.entity_type, id, status)
        })
        .collect()
}

fn upsert(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(record) = payload(event) else {
        return Vec::new();
    };
    event
        .ids
        .iter()
        .map(|id| {
            let status = store.upsert(event.entity_type, id, stamped(event, record));
            applied("upsert", event.entity_type, id, status)
        })
        .collect()
}

fn remove(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    event
        .ids
        .iter()
        .map(|id| {
            let status = store.remove(event.entity_type, id);
            applied("remove", event.entity_type, id, status)
        })
        .collect()
}

fn flow_execution_insert(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(attributes) = event.attributes() else {
        return Vec::new();
    };
    event
        .ids
        .iter()
        .map(|id| {
            let mut record = stamped(event, attributes);
            record.insert("flow_execution_id".to_string(), Value::String(id.clone()));
            let status = store.upsert(EntityType::FlowExecution, id, record);
            applied("flow_execution_insert", EntityType::FlowExecution, id, status)
        })
        .collect()
}

/// Inserts into the newest-first per-workflow list, evicting the oldest
/// entries of that workflow beyond the cap.
fn workflow_execution_insert(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(attributes) = event.attributes() else {
        return Vec::new();
    };
    let mut mutations = Vec::new();
    for id in &event.ids {
        let record = stamped(event, attributes);
        let workflow_id = record.get("workflow_id").and_then(id_from_value);
        let status = store.upsert(EntityType::WorkflowExecution, id, record);
        mutations.push(applied(
            "workflow_execution_insert",
            EntityType::WorkflowExecution,
            id,
            status,
        ));

        let cap = context.workflow_execution_cap;
        let Some(workflow_id) = workflow_id.filter(|_| cap > 0) else {
            continue;
        };
        let listed = store.find_ids(EntityType::WorkflowExecution, |row| {
            field_is(row, "workflow_id", &workflow_id)
        });
        for evicted in listed.iter().skip(cap) {
            let status = store.remove(EntityType::WorkflowExecution, evicted);
            mutations.push(applied(
                "workflow_execution_cap",
                EntityType::WorkflowExecution,
                evicted,
                status,
            ));
        }
    }
    mutations
}

fn workflow_execution_merge(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(changes) = event.changes() else {
        return Vec::new();
    };
    event
        .ids
        .iter()
        .map(|id| {
            let status = store.merge(EntityType::WorkflowExecution, id, changes);
            applied("workflow_execution_merge", EntityType::WorkflowExecution, id, status)
        })
        .collect()
}

fn workflow_execution_remove(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    event
        .ids
        .iter()
        .map(|id| {
            let status = store.remove(EntityType::WorkflowExecution, id);
            applied("workflow_execution_remove", EntityType::WorkflowExecution, id, status)
        })
        .collect()
}

/// Module execution updates may arrive before their flow execution; a stub
/// `{id: execution_id, workflow_id: flow_id}` is created in that case.
fn ensure_parent_execution(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let record = payload(event);
    let execution_id = record
        .and_then(|record| record.get("execution_id"))
        .and_then(id_from_value)
        .or_else(|| event.parent.as_ref().map(|parent| parent.id.clone()));
    let Some(execution_id) = execution_id else {
        return Vec::new();
    };
    if store.contains(EntityType::FlowExecution, &execution_id) {
        return Vec::new();
    }

    let mut stub = Record::new();
    stub.insert("id".to_string(), Value::String(execution_id.clone()));
    if let Some(flow_id) = record
        .and_then(|record| record.get("flow_id"))
        .and_then(id_from_value)
    {
        stub.insert("workflow_id".to_string(), Value::String(flow_id));
    }
    let status = store.upsert(EntityType::FlowExecution, &execution_id, stub);
    vec![applied(
        "ensure_parent_execution",
        EntityType::FlowExecution,
        &execution_id,
        status,
    )]
}

/// Modules embed their tool; a tool update is merged into every embedded copy.
fn merge_module_tools(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(changes) = event.changes() else {
        return Vec::new();
    };
    let mut mutations = Vec::new();
    for tool_id in &event.ids {
        let modules = store.find_ids(EntityType::Module, |module| {
            module
                .get("tool")
                .and_then(Value::as_object)
                .is_some_and(|tool| field_is(tool, "id", tool_id))
        });
        for module_id in modules {
            let status = store.merge_nested(EntityType::Module, &module_id, "tool", changes);
            mutations.push(applied(
                "merge_module_tools",
                EntityType::Module,
                &module_id,
                status,
            ));
        }
    }
    mutations
}

/// Sets `read_state[member_id] = timestamp` on a loaded thread.
fn merge_thread_read_state(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let Some(marker) = payload(event) else {
        return Vec::new();
    };
    let (Some(thread_id), Some(member_id)) = (
        marker.get("thread_id").and_then(id_from_value),
        marker.get("member_id").and_then(id_from_value),
    ) else {
        return Vec::new();
    };
    let Some(thread) = store.get(EntityType::Thread, &thread_id) else {
        return vec![applied(
            "merge_thread_read_state",
            EntityType::Thread,
            &thread_id,
            MutationStatus::NotFound,
        )];
    };
    let mut read_state = thread
        .get("read_state")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    read_state.insert(
        member_id,
        marker.get("timestamp").cloned().unwrap_or(Value::Null),
    );
    let mut changes = Record::new();
    changes.insert("read_state".to_string(), Value::Object(read_state));
    let status = store.merge(EntityType::Thread, &thread_id, &changes);
    vec![applied(
        "merge_thread_read_state",
        EntityType::Thread,
        &thread_id,
        status,
    )]
}

/// Executions of a deleted workflow go with it.
fn remove_workflow_executions(
    store: &mut NormalizedStore,
    event: &CanonicalEvent,
    _context: &HandlerContext,
) -> Vec<AppliedMutation> {
    let mut mutations = Vec::new();
    for workflow_id in &event.ids {
        for (entity_type, field) in [
            (EntityType::FlowExecution, "workflow_id"),
            (EntityType::WorkflowExecution, "workflow_id"),
            (EntityType::ModuleExecution, "flow_id"),
        ] {
            let owned = store.find_ids(entity_type, |row| field_is(row, field, workflow_id));
            for id in owned {
                let status = store.remove(entity_type, &id);
                mutations.push(applied("remove_workflow_executions", entity_type, &id, status));
            }
        }
    }
    mutations
}
