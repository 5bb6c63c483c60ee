//! Read-only views over [`NormalizedStore`] used by dashboard widgets.

use std::cmp::Ordering;

use serde_json::Value;

use crate::event::{EntityType, Record, id_from_value};
use crate::store::NormalizedStore;

#[must_use]
pub fn by_id<'a>(
    store: &'a NormalizedStore,
    entity_type: EntityType,
    id: &str,
) -> Option<&'a Record> {
    store.get(entity_type, id)
}

/// Records in list order.
#[must_use]
pub fn list(store: &NormalizedStore, entity_type: EntityType) -> Vec<&Record> {
    store
        .table(entity_type)
        .map(|table| table.iter().map(|(_, record)| record).collect())
        .unwrap_or_default()
}

/// Records whose `field` names `parent_id`, in list order.
#[must_use]
pub fn by_parent<'a>(
    store: &'a NormalizedStore,
    entity_type: EntityType,
    field: &str,
    parent_id: &str,
) -> Vec<&'a Record> {
    list(store, entity_type)
        .into_iter()
        .filter(|record| record.get(field).and_then(id_from_value).as_deref() == Some(parent_id))
        .collect()
}

/// Records ordered by `field`; numbers before strings, missing values last.
#[must_use]
pub fn sorted_by<'a>(
    store: &'a NormalizedStore,
    entity_type: EntityType,
    field: &str,
) -> Vec<&'a Record> {
    let mut records = list(store, entity_type);
    records.sort_by(|left, right| compare_values(left.get(field), right.get(field)));
    records
}

/// Newest-first execution list of one workflow.
#[must_use]
pub fn workflow_executions<'a>(store: &'a NormalizedStore, workflow_id: &str) -> Vec<&'a Record> {
    by_parent(store, EntityType::WorkflowExecution, "workflow_id", workflow_id)
}

/// Module executions of one flow execution.
#[must_use]
pub fn module_executions<'a>(store: &'a NormalizedStore, execution_id: &str) -> Vec<&'a Record> {
    by_parent(store, EntityType::ModuleExecution, "execution_id", execution_id)
}

#[must_use]
pub fn modules_of_workflow<'a>(store: &'a NormalizedStore, workflow_id: &str) -> Vec<&'a Record> {
    by_parent(store, EntityType::Module, "workflow_id", workflow_id)
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(left)), Some(Value::Number(right))) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(left)), Some(Value::String(right))) => left.cmp(right),
        (Some(Value::Number(_)), Some(_)) => Ordering::Less,
        (Some(_), Some(Value::Number(_))) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{by_parent, list, module_executions, sorted_by, workflow_executions};
    use crate::event::{EntityType, Record};
    use crate::store::NormalizedStore;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    #[test]
    fn parent_views_filter_and_keep_order() {
        let mut store = NormalizedStore::new();
        store.upsert(EntityType::WorkflowExecution, "fe1", record(json!({"workflow_id": "w1"})));
        store.upsert(EntityType::WorkflowExecution, "fe2", record(json!({"workflow_id": "w2"})));
        store.upsert(EntityType::WorkflowExecution, "fe3", record(json!({"workflow_id": "w1"})));
        let ids = workflow_executions(&store, "w1")
            .into_iter()
            .filter_map(|row| row.get("id").cloned())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![json!("fe3"), json!("fe1")]);

        store.upsert(EntityType::ModuleExecution, "me1", record(json!({"execution_id": "fe1"})));
        assert_eq!(module_executions(&store, "fe1").len(), 1);
        assert!(by_parent(&store, EntityType::Field, "table_id", "t").is_empty());
    }

    #[test]
    fn sorted_by_orders_numbers_then_strings_then_missing() {
        let mut store = NormalizedStore::new();
        store.upsert(EntityType::Table, "a", record(json!({"position": "z"})));
        store.upsert(EntityType::Table, "b", Record::new());
        store.upsert(EntityType::Table, "c", record(json!({"position": 2})));
        store.upsert(EntityType::Table, "d", record(json!({"position": 1})));
        let order = sorted_by(&store, EntityType::Table, "position")
            .into_iter()
            .filter_map(|row| row.get("id").cloned())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![json!("d"), json!("c"), json!("a"), json!("b")]);
        assert_eq!(list(&store, EntityType::Table).len(), 4);
    }
}
