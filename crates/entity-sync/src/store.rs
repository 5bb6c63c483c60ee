//! Normalized per-entity store: id → record maps plus ordered id lists.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::error::StoreInvariantError;
use crate::event::{EntityType, IdOrder, Record};

/// Outcome of a single store primitive. Missing targets are reported, not
/// treated as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Inserted,
    Merged,
    Unchanged,
    Removed,
    NotFound,
}

impl MutationStatus {
    #[must_use]
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Merged | Self::Removed)
    }
}

/// Records of one entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityTable {
    records: HashMap<String, Record>,
    ids: Vec<String>,
}

impl EntityTable {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Ids in list order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Records in list order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|record| (id.as_str(), record)))
    }
}

/// Session-owned store. All mutation goes through `upsert`, `merge`,
/// `merge_nested` and `remove`, which keep each id list and record map in
/// bijection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedStore {
    tables: BTreeMap<EntityType, EntityTable>,
}

impl NormalizedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn table(&self, entity_type: EntityType) -> Option<&EntityTable> {
        self.tables.get(&entity_type)
    }

    #[must_use]
    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<&Record> {
        self.tables.get(&entity_type).and_then(|table| table.get(id))
    }

    #[must_use]
    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        self.get(entity_type, id).is_some()
    }

    /// Entity types that currently hold at least one record.
    pub fn entity_types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.tables
            .iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(entity_type, _)| *entity_type)
    }

    /// Inserts the record, or shallow-merges it into an existing one.
    ///
    /// New records get `id` stamped when absent and are placed in the list
    /// according to the entity type's [`IdOrder`].
    pub fn upsert(
        &mut self,
        entity_type: EntityType,
        id: &str,
        mut record: Record,
    ) -> MutationStatus {
        let table = self.tables.entry(entity_type).or_default();
        if let Some(existing) = table.records.get_mut(id) {
            return if merge_into(existing, &record) {
                MutationStatus::Merged
            } else {
                MutationStatus::Unchanged
            };
        }

        record
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
        table.records.insert(id.to_string(), record);
        match entity_type.id_order() {
            IdOrder::Insertion => table.ids.push(id.to_string()),
            IdOrder::NewestFirst => table.ids.insert(0, id.to_string()),
        }
        MutationStatus::Inserted
    }

    /// Shallow-merges `changes` into an existing record; absent ids are left alone.
    pub fn merge(&mut self, entity_type: EntityType, id: &str, changes: &Record) -> MutationStatus {
        let Some(existing) = self
            .tables
            .get_mut(&entity_type)
            .and_then(|table| table.records.get_mut(id))
        else {
            return MutationStatus::NotFound;
        };
        if merge_into(existing, changes) {
            MutationStatus::Merged
        } else {
            MutationStatus::Unchanged
        }
    }

    /// Shallow-merges `changes` into the object stored under `field`.
    pub fn merge_nested(
        &mut self,
        entity_type: EntityType,
        id: &str,
        field: &str,
        changes: &Record,
    ) -> MutationStatus {
        let Some(nested) = self
            .tables
            .get_mut(&entity_type)
            .and_then(|table| table.records.get_mut(id))
            .and_then(|record| record.get_mut(field))
            .and_then(Value::as_object_mut)
        else {
            return MutationStatus::NotFound;
        };
        if merge_into(nested, changes) {
            MutationStatus::Merged
        } else {
            MutationStatus::Unchanged
        }
    }

    pub fn remove(&mut self, entity_type: EntityType, id: &str) -> MutationStatus {
        let Some(table) = self.tables.get_mut(&entity_type) else {
            return MutationStatus::NotFound;
        };
        if table.records.remove(id).is_none() {
            return MutationStatus::NotFound;
        }
        table.ids.retain(|listed| listed != id);
        MutationStatus::Removed
    }

    /// Ids, in list order, whose record satisfies `predicate`.
    pub fn find_ids<F>(&self, entity_type: EntityType, predicate: F) -> Vec<String>
    where
        F: Fn(&Record) -> bool,
    {
        self.tables
            .get(&entity_type)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, record)| predicate(record))
                    .map(|(id, _)| id.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reports the first table whose id list and record keys disagree.
    pub fn check_bijection(&self) -> Result<(), StoreInvariantError> {
        for (entity_type, table) in &self.tables {
            let mut listed = HashSet::with_capacity(table.ids.len());
            for id in &table.ids {
                if !listed.insert(id.as_str()) {
                    return Err(StoreInvariantError::DuplicateListedId {
                        entity_type: *entity_type,
                        id: id.clone(),
                    });
                }
                if !table.records.contains_key(id) {
                    return Err(StoreInvariantError::ListedWithoutRecord {
                        entity_type: *entity_type,
                        id: id.clone(),
                    });
                }
            }
            if let Some(id) = table.records.keys().find(|id| !listed.contains(id.as_str())) {
                return Err(StoreInvariantError::RecordNotListed {
                    entity_type: *entity_type,
                    id: id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Returns whether any field changed.
fn merge_into(target: &mut Record, changes: &Record) -> bool {
    let mut changed = false;
    for (key, value) in changes {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
