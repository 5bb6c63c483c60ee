//! Feeds a recorded stream, one frame per line, through a [`SyncSession`].
//!
//! A line is a JSON frame, a base64-wrapped JSON frame, or a recording
//! envelope `{"received_at_ms": n, "frame": {...}}` carrying the original
//! receipt time.

use std::collections::BTreeMap;
use std::io::BufRead;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use entity_sync::{
    EventDisposition, NormalizedStore, SideEffect, SyncConfig, SyncSession, SyncStats,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay_read_failed:line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame_not_json")]
    NotJson,
    #[error("frame_base64_payload_not_json")]
    Base64PayloadNotJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameEncoding {
    Json,
    Base64,
}

/// Decodes a line as JSON, falling back to base64-wrapped JSON.
pub fn decode_frame(line: &str) -> Result<(Value, FrameEncoding), DecodeError> {
    let trimmed = line.trim();
    if let Ok(frame) = serde_json::from_str::<Value>(trimmed) {
        return Ok((frame, FrameEncoding::Json));
    }
    let bytes = STANDARD
        .decode(trimmed)
        .map_err(|_| DecodeError::NotJson)?;
    serde_json::from_slice::<Value>(&bytes)
        .map(|frame| (frame, FrameEncoding::Base64))
        .map_err(|_| DecodeError::Base64PayloadNotJson)
}

/// Splits a recording envelope into frame and receipt time.
fn unwrap_recording(value: Value) -> (Value, Option<u64>) {
    if let Value::Object(mut fields) = value {
        if fields.contains_key("frame")
            && let Some(received_at_ms) = fields.get("received_at_ms").and_then(Value::as_u64)
        {
            let frame = fields.remove("frame").unwrap_or(Value::Null);
            return (frame, Some(received_at_ms));
        }
        return (Value::Object(fields), None);
    }
    (value, None)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub lines: u64,
    pub blank_lines: u64,
    pub undecodable_lines: u64,
    pub base64_frames: u64,
    pub stats: SyncStats,
    /// Rejections by error code.
    pub rejections: BTreeMap<String, u64>,
    /// Registry misses by entity type.
    pub registry_misses: BTreeMap<String, u64>,
    /// Final record count per entity type.
    pub entity_counts: BTreeMap<String, usize>,
    pub bijection_violation: Option<String>,
    pub unsaved_remote_changes: bool,
    pub pending_effects: Vec<SideEffect>,
}

#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub report: ReplayReport,
    pub store: NormalizedStore,
}

pub fn replay_reader<R: BufRead>(
    reader: R,
    source: &str,
    config: SyncConfig,
) -> Result<ReplayOutcome, ReplayError> {
    let mut session = SyncSession::open(config);
    let mut lines = 0_u64;
    let mut blank_lines = 0_u64;
    let mut undecodable_lines = 0_u64;
    let mut base64_frames = 0_u64;
    let mut rejections = BTreeMap::new();
    let mut registry_misses = BTreeMap::new();

    for line in reader.lines() {
        lines += 1;
        let line = line.map_err(|source| ReplayError::Read {
            line: lines,
            source,
        })?;
        if line.trim().is_empty() {
            blank_lines += 1;
            continue;
        }
        let (decoded, encoding) = match decode_frame(&line) {
            Ok(decoded) => decoded,
            Err(error) => {
                undecodable_lines += 1;
                warn!(line = lines, reason = %error, "skipping undecodable line");
                continue;
            }
        };
        if encoding == FrameEncoding::Base64 {
            base64_frames += 1;
        }

        let (frame, received_at_ms) = unwrap_recording(decoded);
        let report = match received_at_ms {
            Some(received_at_ms) => session.on_message_at(&frame, received_at_ms),
            None => session.on_message(&frame),
        };
        debug!(line = lines, kind = ?report.kind, applied = report.applied(), "replayed frame");

        for error in &report.rejected {
            let code = error.to_string();
            let code = code.split(':').next().unwrap_or_default().to_string();
            *rejections.entry(code).or_insert(0_u64) += 1;
        }
        for outcome in &report.outcomes {
            if outcome.disposition == EventDisposition::RegistryMiss {
                *registry_misses
                    .entry(outcome.entity_type.to_string())
                    .or_insert(0_u64) += 1;
            }
        }
    }

    let store = session.store().clone();
    let bijection_violation = store.check_bijection().err().map(|error| error.to_string());
    let unsaved_remote_changes = session.has_unsaved_remote_changes();
    let pending_effects = session.drain_effects();
    let stats = session.close();

    let report = ReplayReport {
        generated_at: Utc::now(),
        source: source.to_string(),
        lines,
        blank_lines,
        undecodable_lines,
        base64_frames,
        stats,
        rejections,
        registry_misses,
        entity_counts: entity_counts(&store),
        bijection_violation,
        unsaved_remote_changes,
        pending_effects,
    };
    Ok(ReplayOutcome { report, store })
}

fn entity_counts(store: &NormalizedStore) -> BTreeMap<String, usize> {
    store
        .entity_types()
        .filter_map(|entity_type| {
            store
                .table(entity_type)
                .map(|table| (entity_type.to_string(), table.len()))
        })
        .collect()
}

/// Store contents keyed by entity type, records in list order.
pub fn store_snapshot(store: &NormalizedStore) -> Value {
    let mut snapshot = Map::new();
    for entity_type in store.entity_types() {
        let records = store
            .table(entity_type)
            .map(|table| {
                table
                    .iter()
                    .map(|(_, record)| Value::Object(record.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        snapshot.insert(entity_type.to_string(), Value::Array(records));
    }
    Value::Object(snapshot)
}
