//! Sync session: frame router plus the adapt → echo → guard → registry pipeline.
//!
//! A session owns its store and processes one frame to completion before the
//! next. Nothing escapes a frame: every outcome, including rejection, is
//! reported in the returned [`FrameReport`].

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::config::SyncConfig;
use crate::current::{adapt_current, is_dotted_type};
use crate::echo::EchoPolicy;
use crate::effects::{Adaptation, SideEffect};
use crate::error::AdaptError;
use crate::event::{Action, CanonicalEvent, EntityType, Record, id_from_value};
use crate::guard::{GuardVerdict, IdempotencyGuard};
use crate::legacy::adapt_legacy;
use crate::registry::{AppliedMutation, HandlerContext, dispatch};
use crate::store::{MutationStatus, NormalizedStore};

/// Route chosen for an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Transport acknowledgement (`type == "ack"`).
    Ack,
    /// Service metrics; logged only.
    Telemetry,
    /// Preview / repository notification (`repo_name` present).
    Preview,
    /// Dotted `entity.action` event.
    Current,
    /// Flat legacy event.
    Legacy,
}

/// Routing order: ack, telemetry, preview, dotted type, legacy.
#[must_use]
pub fn classify_frame(frame: &Value) -> FrameKind {
    let wire_type = frame.get("type").and_then(Value::as_str);
    if wire_type == Some("ack") {
        return FrameKind::Ack;
    }
    if frame.get("entity").and_then(Value::as_str) == Some("ServiceMetrics") {
        return FrameKind::Telemetry;
    }
    if frame.get("repo_name").is_some_and(|value| !value.is_null()) {
        return FrameKind::Preview;
    }
    if wire_type.is_some_and(is_dotted_type) {
        return FrameKind::Current;
    }
    FrameKind::Legacy
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum EventDisposition {
    Applied { mutations: Vec<AppliedMutation> },
    SuppressedEcho,
    Duplicate { first_seen_at_ms: u64 },
    RegistryMiss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    pub entity_type: EntityType,
    pub action: Action,
    pub ids: Vec<String>,
    #[serde(flatten)]
    pub disposition: EventDisposition,
}

/// Result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub kind: FrameKind,
    pub received_at_ms: u64,
    pub outcomes: Vec<EventOutcome>,
    pub rejected: Vec<AdaptError>,
    pub ignored: bool,
}

impl FrameReport {
    fn new(kind: FrameKind, received_at_ms: u64) -> Self {
        Self {
            kind,
            received_at_ms,
            outcomes: Vec::new(),
            rejected: Vec::new(),
            ignored: false,
        }
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.disposition, EventDisposition::Applied { .. }))
            .count()
    }
}

/// Running counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub frames: u64,
    pub acks: u64,
    pub telemetry: u64,
    pub previews: u64,
    pub events: u64,
    pub applied: u64,
    pub mutations: u64,
    pub suppressed_echoes: u64,
    pub duplicates: u64,
    pub registry_misses: u64,
    pub rejected: u64,
    pub ignored: u64,
    pub local_writes: u64,
    pub fetched_merges: u64,
}

#[derive(Debug)]
pub struct SyncSession {
    config: SyncConfig,
    store: NormalizedStore,
    guard: IdempotencyGuard,
    echo: EchoPolicy,
    context: HandlerContext,
    unsaved_remote_changes: bool,
    effects: Vec<SideEffect>,
    stats: SyncStats,
    opened_at: Instant,
}

impl SyncSession {
    #[must_use]
    pub fn open(config: SyncConfig) -> Self {
        info!(
            local_actor_id = config.local_actor_id.as_deref().unwrap_or("-"),
            dedup_window_ms = config.dedup_window_ms,
            workflow_execution_cap = config.workflow_execution_cap,
            suppress_self_echo = config.suppress_self_echo,
            "sync session opened"
        );
        Self {
            store: NormalizedStore::new(),
            guard: IdempotencyGuard::new(config.dedup_window_ms, config.guard_capacity),
            echo: if config.suppress_self_echo {
                EchoPolicy::default()
            } else {
                EchoPolicy::disabled()
            },
            context: HandlerContext {
                workflow_execution_cap: config.workflow_execution_cap,
            },
            unsaved_remote_changes: false,
            effects: Vec::new(),
            stats: SyncStats::default(),
            opened_at: Instant::now(),
            config,
        }
    }

    /// Ends the session and returns its final counters.
    pub fn close(self) -> SyncStats {
        info!(
            frames = self.stats.frames,
            applied = self.stats.applied,
            rejected = self.stats.rejected,
            "sync session closed"
        );
        self.stats
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &NormalizedStore {
        &self.store
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn set_local_actor_id(&mut self, local_actor_id: Option<String>) {
        self.config.local_actor_id = local_actor_id.filter(|actor| !actor.trim().is_empty());
    }

    /// Set by any remote file event until the editor acknowledges it.
    #[must_use]
    pub fn has_unsaved_remote_changes(&self) -> bool {
        self.unsaved_remote_changes
    }

    pub fn acknowledge_remote_changes(&mut self) {
        self.unsaved_remote_changes = false;
    }

    #[must_use]
    pub fn pending_effects(&self) -> &[SideEffect] {
        &self.effects
    }

    pub fn drain_effects(&mut self) -> Vec<SideEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Processes a frame stamped with the session's monotonic clock.
    pub fn on_message(&mut self, frame: &Value) -> FrameReport {
        let received_at_ms =
            u64::try_from(self.opened_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.on_message_at(frame, received_at_ms)
    }

    pub fn on_message_at(&mut self, frame: &Value, received_at_ms: u64) -> FrameReport {
        self.stats.frames += 1;
        let kind = classify_frame(frame);
        let mut report = FrameReport::new(kind, received_at_ms);
        match kind {
            FrameKind::Ack => {
                self.stats.acks += 1;
                trace!("ack frame");
            }
            FrameKind::Telemetry => {
                self.stats.telemetry += 1;
                debug!(frame = %frame, "service metrics frame");
            }
            FrameKind::Preview => {
                self.stats.previews += 1;
                let interface_id = frame.get("interface_id").and_then(id_from_value);
                let repo_name = frame.get("repo_name").and_then(Value::as_str).unwrap_or("-");
                debug!(repo_name, "preview frame; refreshing file tree");
                self.effects.push(SideEffect::RefreshFileTree { interface_id });
            }
            FrameKind::Current => {
                let adaptation = adapt_current(frame, received_at_ms);
                self.absorb(adaptation, &mut report);
            }
            FrameKind::Legacy => {
                let adaptation = adapt_legacy(frame, received_at_ms);
                self.absorb(adaptation, &mut report);
            }
        }
        report
    }

    fn absorb(&mut self, adaptation: Adaptation, report: &mut FrameReport) {
        let Adaptation {
            events,
            rejected,
            effects,
            marks_unsaved_remote_changes,
            ignored,
        } = adaptation;

        if marks_unsaved_remote_changes {
            self.unsaved_remote_changes = true;
        }
        self.effects.extend(effects);
        if ignored {
            self.stats.ignored += 1;
            report.ignored = true;
        }
        self.stats.rejected += rejected.len() as u64;
        report.rejected = rejected;

        for event in events {
            let event = self.resolve_table_name(event);
            let disposition = self.apply_event(&event);
            report.outcomes.push(EventOutcome {
                entity_type: event.entity_type,
                action: event.action(),
                ids: event.ids,
                disposition,
            });
        }
    }

    /// Keys a name-only table record event under the loaded table whose
    /// `name` or `db_name` matches, else under the name itself.
    fn resolve_table_name(&self, event: CanonicalEvent) -> CanonicalEvent {
        let Some(table_name) = event.unresolved_table_name().map(str::to_string) else {
            return event;
        };
        let matching = self.store.find_ids(EntityType::Table, |table| {
            ["name", "db_name"]
                .into_iter()
                .any(|field| {
                    table.get(field).and_then(Value::as_str) == Some(table_name.as_str())
                })
        });
        let table_id = matching.into_iter().next().unwrap_or_else(|| {
            debug!(table_name = %table_name, "no loaded table with this name; keying by name");
            table_name.clone()
        });
        event.scoped_to_table(&table_id)
    }

    /// Runs one canonical event through echo filter, guard and registry.
    pub fn apply_event(&mut self, event: &CanonicalEvent) -> EventDisposition {
        self.stats.events += 1;
        let local_actor_id = self.config.local_actor_id.as_deref();
        if !self.echo.should_apply(event, local_actor_id) {
            self.stats.suppressed_echoes += 1;
            debug!(
                entity_type = %event.entity_type,
                action = %event.action(),
                ids = ?event.ids,
                "suppressed self echo"
            );
            return EventDisposition::SuppressedEcho;
        }

        if let GuardVerdict::Duplicate { first_seen_at_ms } = self.guard.admit(event) {
            self.stats.duplicates += 1;
            debug!(
                entity_type = %event.entity_type,
                ids = ?event.ids,
                first_seen_at_ms,
                "duplicate delivery ignored"
            );
            return EventDisposition::Duplicate { first_seen_at_ms };
        }

        let Some(mutations) = dispatch(&mut self.store, event, &self.context) else {
            self.stats.registry_misses += 1;
            warn!(
                entity_type = %event.entity_type,
                action = %event.action(),
                wire_type = %event.wire_type,
                "no handler registered for event"
            );
            return EventDisposition::RegistryMiss;
        };
        self.stats.applied += 1;
        self.stats.mutations += mutations.len() as u64;
        debug!(
            entity_type = %event.entity_type,
            action = %event.action(),
            mutations = mutations.len(),
            "applied event"
        );
        EventDisposition::Applied { mutations }
    }

    /// Optimistic local write; inserts or shallow-merges `fields`.
    pub fn apply_local(
        &mut self,
        entity_type: EntityType,
        id: &str,
        fields: Record,
    ) -> MutationStatus {
        self.stats.local_writes += 1;
        self.store.upsert(entity_type, id, fields)
    }

    /// REST-fetched fields. Only the fetched fields are replaced; a record
    /// updated over the socket meanwhile keeps its other fields.
    pub fn merge_fetched(
        &mut self,
        entity_type: EntityType,
        id: &str,
        fields: Record,
    ) -> MutationStatus {
        self.stats.fetched_merges += 1;
        self.store.upsert(entity_type, id, fields)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{EventDisposition, FrameKind, SyncSession, classify_frame};
    use crate::config::SyncConfig;
    use crate::effects::SideEffect;
    use crate::event::{EntityType, Record};
    use crate::store::MutationStatus;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    #[test]
    fn frames_are_routed_in_priority_order() {
        assert_eq!(classify_frame(&json!({"type": "ack"})), FrameKind::Ack);
        assert_eq!(
            classify_frame(&json!({"type": "workflow.updated", "entity": "ServiceMetrics"})),
            FrameKind::Telemetry
        );
        assert_eq!(
            classify_frame(&json!({"type": "FileUpdate", "repo_name": "site"})),
            FrameKind::Preview
        );
        assert_eq!(classify_frame(&json!({"type": "base.created"})), FrameKind::Current);
        assert_eq!(classify_frame(&json!({"type": "BaseNew"})), FrameKind::Legacy);
        assert_eq!(classify_frame(&json!("garbage")), FrameKind::Legacy);
    }

    #[test]
    fn non_event_frames_touch_no_store_state() {
        let mut session = SyncSession::open(SyncConfig::default());
        for frame in [
            json!({"type": "ack", "id": 1}),
            json!({"entity": "ServiceMetrics", "cpu": 0.4}),
        ] {
            let report = session.on_message_at(&frame, 0);
            assert!(report.outcomes.is_empty());
            assert!(report.rejected.is_empty());
        }
        assert_eq!(session.store().entity_types().count(), 0);
        let stats = session.stats();
        assert_eq!((stats.acks, stats.telemetry), (1, 1));
    }

    #[test]
    fn preview_frame_queues_tree_refresh() {
        let mut session = SyncSession::open(SyncConfig::default());
        session.on_message_at(&json!({"repo_name": "site", "interface_id": "if-1"}), 0);
        assert_eq!(
            session.drain_effects(),
            vec![SideEffect::RefreshFileTree {
                interface_id: Some("if-1".to_string())
            }]
        );
        assert!(session.pending_effects().is_empty());
    }

    #[test]
    fn malformed_frame_is_reported_not_raised() {
        let mut session = SyncSession::open(SyncConfig::default());
        let report = session.on_message_at(&json!(42), 0);
        assert_eq!(report.rejected.len(), 1);
        let report =
            session.on_message_at(&json!({"type": "WorkflowNew", "data": {"attributes": {}}}), 0);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(session.stats().rejected, 2);
    }

    #[test]
    fn self_echo_is_suppressed_and_counted() {
        let mut session = SyncSession::open(SyncConfig::for_actor("u1"));
        session.apply_local(EntityType::Module, "m1", record(json!({"name": "local"})));
        let report = session.on_message_at(
            &json!({
                "type": "ModuleUpdate",
                "user_id": "u1",
                "data": {"ids": ["m1"], "changes": {"name": "echo"}}
            }),
            0,
        );
        assert_eq!(
            report.outcomes.first().map(|outcome| outcome.disposition.clone()),
            Some(EventDisposition::SuppressedEcho)
        );
        assert_eq!(
            session.store().get(EntityType::Module, "m1").and_then(|row| row.get("name")),
            Some(&json!("local"))
        );
        assert_eq!(session.stats().suppressed_echoes, 1);
    }

    #[test]
    fn disabled_echo_filter_applies_own_updates() {
        let mut session = SyncSession::open(SyncConfig {
            suppress_self_echo: false,
            ..SyncConfig::for_actor("u1")
        });
        session.apply_local(EntityType::Tool, "t1", Record::new());
        let report = session.on_message_at(
            &json!({
                "type": "tool.updated",
                "user_id": "u1",
                "data": {"ids": ["t1"], "changes": {"name": "x"}}
            }),
            0,
        );
        assert_eq!(report.applied(), 1);
    }

    #[test]
    fn duplicate_delivery_is_counted_once() {
        let mut session = SyncSession::open(SyncConfig::default());
        let frame =
            json!({"type": "WorkflowNew", "data": {"attributes": {"id": "w1", "name": "A"}}});
        assert_eq!(session.on_message_at(&frame, 100).applied(), 1);
        let again = session.on_message_at(&frame, 150);
        assert!(matches!(
            again.outcomes.first().map(|outcome| &outcome.disposition),
            Some(EventDisposition::Duplicate {
                first_seen_at_ms: 100
            })
        ));
        assert_eq!(session.stats().duplicates, 1);
    }

    #[test]
    fn file_events_raise_editor_signal_until_acknowledged() {
        let mut session = SyncSession::open(SyncConfig::default());
        assert!(!session.has_unsaved_remote_changes());
        session.on_message_at(
            &json!({"type": "FileDelete", "data": {"file_name": "src/a.ts"}}),
            0,
        );
        assert!(session.has_unsaved_remote_changes());
        assert_eq!(session.pending_effects().len(), 2);
        session.acknowledge_remote_changes();
        assert!(!session.has_unsaved_remote_changes());
    }

    #[test]
    fn registry_miss_leaves_store_untouched() {
        let mut session = SyncSession::open(SyncConfig::default());
        let report = session.on_message_at(
            &json!({
                "type": "TemplateNew",
                "agent_id": "ag1",
                "data": {"attributes": {"id": "tpl"}}
            }),
            0,
        );
        assert!(matches!(
            report.outcomes.first().map(|outcome| &outcome.disposition),
            Some(EventDisposition::RegistryMiss)
        ));
        assert_eq!(session.store().entity_types().count(), 0);
        assert_eq!(session.close().registry_misses, 1);
    }

    #[test]
    fn fetched_fields_merge_without_replacing_record() {
        let mut session = SyncSession::open(SyncConfig::default());
        session.on_message_at(
            &json!({
                "type": "WorkflowNew",
                "data": {"attributes": {"id": "w1", "name": "A", "status": "on"}}
            }),
            0,
        );
        let status =
            session.merge_fetched(EntityType::Workflow, "w1", record(json!({"status": "off"})));
        assert_eq!(status, MutationStatus::Merged);
        let stored = session.store().get(EntityType::Workflow, "w1");
        assert_eq!(stored.and_then(|row| row.get("name")), Some(&json!("A")));
        assert_eq!(stored.and_then(|row| row.get("status")), Some(&json!("off")));
    }

    #[test]
    fn named_table_records_resolve_to_the_loaded_table() {
        let mut session = SyncSession::open(SyncConfig::default());
        session.apply_local(
            EntityType::Table,
            "tb1",
            record(json!({"name": "Orders", "db_name": "orders"})),
        );
        let report = session.on_message_at(
            &json!({
                "type": "RecordsNew",
                "data": {"table_name": "orders", "records": [{"id": 3, "qty": 2}]}
            }),
            0,
        );
        assert_eq!(
            report.outcomes.first().map(|outcome| outcome.ids.clone()),
            Some(vec!["tb1/3".to_string()])
        );
        let stored = session.store().get(EntityType::TableRecord, "tb1/3");
        assert_eq!(stored.and_then(|row| row.get("table_id")), Some(&json!("tb1")));
        assert_eq!(stored.and_then(|row| row.get("table_name")), Some(&json!("orders")));

        session.on_message_at(
            &json!({
                "type": "RecordsNew",
                "data": {"table_name": "unloaded", "records": [{"id": 3}]}
            }),
            0,
        );
        assert!(session.store().contains(EntityType::TableRecord, "unloaded/3"));
    }

    #[test]
    fn thread_read_marker_updates_loaded_thread() {
        let mut session = SyncSession::open(SyncConfig::default());
        session.on_message_at(
            &json!({
                "type": "ThreadOpened",
                "data": {"attributes": {"id": "th1", "room_id": "r1", "read_state": {}}}
            }),
            0,
        );
        session.on_message_at(
            &json!({
                "type": "ThreadRead",
                "data": {"ids": ["th1_mem7"], "changes": {"timestamp": "t1"}}
            }),
            5,
        );
        assert_eq!(
            session
                .store()
                .get(EntityType::Thread, "th1")
                .and_then(|row| row.get("read_state")),
            Some(&json!({"mem7": "t1"}))
        );
    }

    #[test]
    fn local_actor_can_be_set_after_open() {
        let mut session = SyncSession::open(SyncConfig::default());
        session.set_local_actor_id(Some("u9".to_string()));
        assert_eq!(session.config().local_actor_id.as_deref(), Some("u9"));
        session.set_local_actor_id(Some("  ".to_string()));
        assert_eq!(session.config().local_actor_id, None);
    }
}
