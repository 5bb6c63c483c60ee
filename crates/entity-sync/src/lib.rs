//! Real-time entity event synchronization for the altaner dashboard.
//!
//! Inbound socket frames in either the legacy flat format or the dotted
//! `entity.action` format are adapted into [`CanonicalEvent`]s, filtered for
//! self-echo, de-duplicated, and routed through a static handler registry into
//! a per-session [`NormalizedStore`].

pub mod config;
pub mod current;
pub mod echo;
pub mod effects;
pub mod error;
pub mod event;
pub mod guard;
pub mod legacy;
pub mod registry;
pub mod selectors;
pub mod session;
pub mod store;
mod wire;

pub use config::SyncConfig;
pub use effects::{Adaptation, SideEffect};
pub use error::{AdaptError, EventShapeError, StoreInvariantError};
pub use event::{Action, CanonicalEvent, EntityType, Record, TemplateOwner};
pub use session::{EventDisposition, FrameKind, FrameReport, SyncSession, SyncStats};
pub use store::{MutationStatus, NormalizedStore};
