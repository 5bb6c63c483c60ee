use std::collections::BTreeSet;

use entity_sync::{EntityType, SyncConfig, SyncSession};
use quickcheck::{Arbitrary, Gen, QuickCheck};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy)]
enum Op {
    Create(u8, u8),
    Update(u8, u8),
    Delete(u8),
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        let id = u8::arbitrary(g) % 6;
        let value = u8::arbitrary(g);
        match u8::arbitrary(g) % 3 {
            0 => Self::Create(id, value),
            1 => Self::Update(id, value),
            _ => Self::Delete(id),
        }
    }
}

/// Legacy frame for `op` against `stem` (e.g. `Notification`, `Workflow`).
fn frame(stem: &str, op: Op) -> Value {
    match op {
        Op::Create(id, value) => json!({
            "type": format!("{stem}New"),
            "data": {"attributes": {"id": format!("x{id}"), "value": value}}
        }),
        Op::Update(id, value) => json!({
            "type": format!("{stem}Update"),
            "data": {"ids": [format!("x{id}")], "changes": {"value": value}}
        }),
        Op::Delete(id) => json!({
            "type": format!("{stem}Delete"),
            "data": {"ids": [format!("x{id}")]}
        }),
    }
}

fn unguarded_session() -> SyncSession {
    SyncSession::open(SyncConfig {
        dedup_window_ms: 0,
        ..SyncConfig::default()
    })
}

fn bijection_matches_model(ops: Vec<Op>) -> bool {
    let mut session = unguarded_session();
    let mut model = BTreeSet::new();
    for (index, op) in ops.iter().enumerate() {
        for stem in ["Notification", "Workflow"] {
            session.on_message_at(&frame(stem, *op), index as u64);
        }
        match op {
            Op::Create(id, _) => {
                model.insert(format!("x{id}"));
            }
            Op::Update(..) => {}
            Op::Delete(id) => {
                model.remove(&format!("x{id}"));
            }
        }
    }

    let store = session.store();
    if store.check_bijection().is_err() {
        return false;
    }
    [EntityType::Notification, EntityType::Workflow]
        .into_iter()
        .all(|entity_type| {
            let listed = store
                .table(entity_type)
                .map(|table| table.ids().iter().cloned().collect::<BTreeSet<_>>())
                .unwrap_or_default();
            listed == model
        })
}

fn double_application_matches_single(ops: Vec<Op>) -> bool {
    let mut once = unguarded_session();
    let mut twice = unguarded_session();
    for (index, op) in ops.iter().enumerate() {
        let frame = frame("Notification", *op);
        let at = index as u64;
        once.on_message_at(&frame, at);
        twice.on_message_at(&frame, at);
        twice.on_message_at(&frame, at);
        if once.store() != twice.store() {
            return false;
        }
    }
    true
}

fn guarded_redelivery_is_reported_as_duplicate(ops: Vec<Op>) -> bool {
    let mut session = SyncSession::open(SyncConfig::default());
    let mut expected_duplicates = 0_u64;
    for (index, op) in ops.iter().enumerate() {
        let frame = frame("Workflow", *op);
        let at = index as u64;
        let first = session.on_message_at(&frame, at);
        session.on_message_at(&frame, at);
        if !first.outcomes.is_empty() {
            expected_duplicates += 1;
        }
    }
    // A redelivery may also collide with an identical earlier op; never fewer.
    session.stats().duplicates >= expected_duplicates
}

#[test]
fn id_list_and_records_stay_in_bijection() {
    QuickCheck::new()
        .tests(300)
        .quickcheck(bijection_matches_model as fn(Vec<Op>) -> bool);
}

#[test]
fn applying_each_event_twice_equals_applying_once() {
    QuickCheck::new()
        .tests(300)
        .quickcheck(double_application_matches_single as fn(Vec<Op>) -> bool);
}

#[test]
fn immediate_redelivery_is_always_caught() {
    QuickCheck::new()
        .tests(200)
        .quickcheck(guarded_redelivery_is_reported_as_duplicate as fn(Vec<Op>) -> bool);
}
