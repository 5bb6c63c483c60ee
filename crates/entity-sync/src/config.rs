//! Session configuration.

use crate::guard::{DEFAULT_DEDUP_WINDOW_MS, DEFAULT_GUARD_CAPACITY};
use crate::registry::DEFAULT_WORKFLOW_EXECUTION_CAP;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Actor whose own suppressible echoes are dropped.
    pub local_actor_id: Option<String>,
    pub dedup_window_ms: u64,
    pub guard_capacity: usize,
    pub workflow_execution_cap: usize,
    pub suppress_self_echo: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_actor_id: None,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            guard_capacity: DEFAULT_GUARD_CAPACITY,
            workflow_execution_cap: DEFAULT_WORKFLOW_EXECUTION_CAP,
            suppress_self_echo: true,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn for_actor(local_actor_id: impl Into<String>) -> Self {
        Self {
            local_actor_id: Some(local_actor_id.into()),
            ..Self::default()
        }
    }
}
