use std::fs::File;
use std::io::{BufReader, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use entity_sync::{EntityType, SideEffect, SyncConfig};
use serde_json::json;
use sync_replay::replay::{replay_reader, store_snapshot};

fn recorded(received_at_ms: u64, frame: serde_json::Value) -> String {
    json!({"received_at_ms": received_at_ms, "frame": frame}).to_string()
}

#[test]
fn replay_summarises_a_recorded_stream() {
    let mut file = tempfile::NamedTempFile::new().expect("create temp recording");
    let lines = [
        recorded(
            0,
            json!({"type": "WorkflowNew", "data": {"attributes": {"id": "w1", "name": "A"}}}),
        ),
        recorded(
            10,
            json!({
                "type": "WorkflowUpdate",
                "user_id": "me",
                "data": {"ids": ["w1"], "changes": {"name": "echo"}}
            }),
        ),
        recorded(
            20,
            json!({
                "type": "flow_execution.created",
                "workflow_id": "w1",
                "data": {"attributes": {"id": "fe1"}}
            }),
        ),
        STANDARD.encode(
            json!({"type": "FileDelete", "interface_id": "if-1", "data": {"file_name": "src/a.ts"}})
                .to_string(),
        ),
        recorded(30, json!({"type": "ack"})),
        recorded(
            40,
            json!({"type": "TemplateNew", "form_id": "f1", "data": {"attributes": {"id": "tpl"}}}),
        ),
        String::new(),
        "%%% not a frame %%%".to_string(),
        recorded(50, json!({"type": "GizmoNew", "data": {}})),
    ];
    for line in &lines {
        writeln!(file, "{line}").expect("write recording line");
    }

    let reader = BufReader::new(File::open(file.path()).expect("reopen recording"));
    let outcome = replay_reader(reader, "fixture", SyncConfig::for_actor("me"))
        .expect("replay should read the whole file");
    let report = &outcome.report;

    assert_eq!(report.lines, 9);
    assert_eq!(report.blank_lines, 1);
    assert_eq!(report.undecodable_lines, 1);
    assert_eq!(report.base64_frames, 1);
    assert_eq!(report.stats.suppressed_echoes, 1);
    assert_eq!(report.stats.acks, 1);
    assert_eq!(report.rejections.get("unknown_event_type"), Some(&1));
    assert_eq!(report.registry_misses.get("form_template"), Some(&1));
    assert_eq!(report.entity_counts.get("workflow"), Some(&1));
    assert_eq!(report.entity_counts.get("flow_execution"), Some(&1));
    assert_eq!(report.entity_counts.get("workflow_execution"), Some(&1));
    assert!(report.bijection_violation.is_none());
    assert!(report.unsaved_remote_changes);
    assert_eq!(
        report.pending_effects,
        vec![
            SideEffect::CloseFile {
                path: "src/a.ts".to_string()
            },
            SideEffect::RefreshFileTree {
                interface_id: Some("if-1".to_string())
            },
        ]
    );

    assert_eq!(
        outcome
            .store
            .get(EntityType::Workflow, "w1")
            .and_then(|row| row.get("name")),
        Some(&json!("A"))
    );
    let snapshot = store_snapshot(&outcome.store);
    assert_eq!(snapshot["workflow"][0]["name"], json!("A"));

    let encoded = serde_json::to_value(report).expect("report serialises");
    assert_eq!(encoded["stats"]["suppressed_echoes"], json!(1));
    assert_eq!(encoded["pending_effects"][0]["kind"], json!("close_file"));
}
