//! Dotted `entity.action` adapter.

use serde_json::Value;
use tracing::{debug, warn};

use crate::effects::Adaptation;
use crate::error::AdaptError;
use crate::event::{Action, EntityType, SourceFormat, TemplateScope};
use crate::wire::Envelope;

/// Agent response stream prefixes; rendered outside the store.
const IGNORED_ENTITIES: &[&str] = &["response", "activation", "message_part", "plan"];

/// True when `wire_type` has the `<entity>.<action>` shape.
#[must_use]
pub fn is_dotted_type(wire_type: &str) -> bool {
    wire_type
        .split_once('.')
        .is_some_and(|(entity, action)| !entity.is_empty() && !action.is_empty())
}

/// Adapts one dotted-format frame.
#[must_use]
pub fn adapt_current(frame: &Value, received_at_ms: u64) -> Adaptation {
    let adaptation = match Envelope::parse(frame, received_at_ms, SourceFormat::Current) {
        Ok(envelope) => adapt_envelope(&envelope),
        Err(error) => Adaptation::rejected(error),
    };
    for error in &adaptation.rejected {
        warn!(reason = %error, "dropping event");
    }
    adaptation
}

fn adapt_envelope(envelope: &Envelope<'_>) -> Adaptation {
    let wire_type = envelope.wire_type;
    let Some((entity, action)) = wire_type.split_once('.') else {
        return Adaptation::rejected(AdaptError::UnknownType(wire_type.to_string()));
    };
    if IGNORED_ENTITIES.contains(&entity) {
        debug!(wire_type, "agent stream event has no store projection");
        return Adaptation::ignored();
    }
    let Some(action) = Action::from_wire_name(action) else {
        return Adaptation::rejected(AdaptError::UnknownAction(wire_type.to_string()));
    };

    let scope = match entity {
        "template" => Some(TemplateScope::Template),
        "template_version" => Some(TemplateScope::Version),
        _ => None,
    };
    if let Some(scope) = scope {
        return Adaptation::from_result(envelope.template_event(scope, action));
    }

    let Some(entity_type) = EntityType::from_wire_name(entity) else {
        return Adaptation::rejected(AdaptError::UnknownEntity(wire_type.to_string()));
    };
    let event = envelope.standard_event(entity_type, action, None);
    if entity_type != EntityType::TableRecord {
        return Adaptation::from_result(event);
    }
    Adaptation::from_result(event.and_then(|event| {
        let payload = event.attributes().or_else(|| event.changes());
        let table = envelope.table_ref(payload).ok_or_else(|| {
            AdaptError::malformed(wire_type, "missing table_id and table_name")
        })?;
        Ok(table.scope(event))
    }))
}
