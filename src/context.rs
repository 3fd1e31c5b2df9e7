//! Tracing context attached to events at construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::event::LeadEvent;

/// Cross-cutting metadata passed to the event factory.
///
/// Carries correlation and causation links plus free-form metadata without
/// polluting the event payloads. These are the only envelope fields a
/// producer controls; id, timestamp and version are stamped by the factory.
///
/// # Examples
///
/// ```
/// use leadfold::EventContext;
/// use serde_json::json;
/// use uuid::Uuid;
///
/// let request = Uuid::new_v4();
/// let ctx = EventContext::default()
///     .with_correlation_id(request)
///     .with_metadata(json!({"source": "api"}));
///
/// assert_eq!(ctx.correlation_id, Some(request));
/// assert!(ctx.metadata.is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    /// Shared by every event produced while handling one request or workflow.
    pub correlation_id: Option<Uuid>,
    /// Id of the event that directly caused this one.
    pub causation_id: Option<Uuid>,
    /// Arbitrary metadata copied onto the event envelope.
    pub metadata: Option<Map<String, Value>>,
}

impl EventContext {
    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Set the causation id.
    pub fn with_causation_id(mut self, id: Uuid) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Link to a parent event.
    ///
    /// The parent's id becomes the causation id. Its correlation id is
    /// inherited, or if it had none the parent's own id starts the chain.
    pub fn caused_by(mut self, parent: &LeadEvent) -> Self {
        self.causation_id = Some(parent.id());
        self.correlation_id = Some(parent.correlation_id().unwrap_or(parent.id()));
        self
    }

    /// Set arbitrary metadata.
    ///
    /// Only JSON objects are kept; any other value clears the metadata.
    pub fn with_metadata(mut self, meta: Value) -> Self {
        self.metadata = match meta {
            Value::Object(map) => Some(map),
            _ => None,
        };
        self
    }
}
