//! Adapter output: canonical events plus work requested from collaborators
//! outside the store.

use serde::Serialize;

use crate::error::AdaptError;
use crate::event::CanonicalEvent;

/// Queued request for the embedding application; never awaited by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    /// The editor should close a file removed server-side.
    CloseFile { path: String },
    /// The file tree changed shape and should be re-fetched.
    RefreshFileTree { interface_id: Option<String> },
}

/// Everything one inbound frame adapted into.
///
/// Batch frames may yield several events alongside rejected entries; a
/// rejected entry never prevents its siblings from being adapted.
#[derive(Debug, Clone, Default)]
pub struct Adaptation {
    pub events: Vec<CanonicalEvent>,
    pub rejected: Vec<AdaptError>,
    pub effects: Vec<SideEffect>,
    pub marks_unsaved_remote_changes: bool,
    /// Recognised type with no store projection.
    pub ignored: bool,
}

impl Adaptation {
    pub(crate) fn event(event: CanonicalEvent) -> Self {
        Self {
            events: vec![event],
            ..Self::default()
        }
    }

    pub(crate) fn rejected(error: AdaptError) -> Self {
        Self {
            rejected: vec![error],
            ..Self::default()
        }
    }

    pub(crate) fn ignored() -> Self {
        Self {
            ignored: true,
            ..Self::default()
        }
    }

    pub(crate) fn from_result(result: Result<CanonicalEvent, AdaptError>) -> Self {
        match result {
            Ok(event) => Self::event(event),
            Err(error) => Self::rejected(error),
        }
    }
}
