//! Feed items and live mutation events.
//!
//! `MaterializedItem` is the unit exchanged with consumers. `LiveEvent` is the
//! payload shape received from the push channel and republished on the bus.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a feed item: object type plus id.
///
/// Used for deduplication between paged fetches and live events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub object_type: String,
    pub id: String,
}

impl ItemIdentity {
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object_type, self.id)
    }
}

/// A feed element with a stable identity and a sortable timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedItem {
    pub identity: ItemIdentity,
    /// Sort key consumed by the feed order.
    pub timestamp: DateTime<Utc>,
    /// Opaque provider payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl MaterializedItem {
    pub fn new(identity: ItemIdentity, timestamp: DateTime<Utc>, payload: serde_json::Value) -> Self {
        Self {
            identity,
            timestamp,
            payload,
        }
    }
}

/// Kind of mutation carried by a live event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Created, EventKind::Updated, EventKind::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }

    /// Parse a kind from either a bare name (`"created"`) or a namespaced
    /// event type (`"comment:created"`).
    pub fn parse(event_type: &str) -> Option<Self> {
        let kind = event_type.rsplit(':').next().unwrap_or(event_type);
        match kind {
            "created" => Some(EventKind::Created),
            "updated" => Some(EventKind::Updated),
            "deleted" => Some(EventKind::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic name for a given entity type and mutation kind, e.g. `comment:created`.
pub fn topic_name(entity_type: &str, kind: EventKind) -> String {
    format!("{}:{}", entity_type, kind.as_str())
}

/// Event received from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub event_type: String,
    pub entity_id: String,
    pub entity_type: String,
    pub scope_key: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl LiveEvent {
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }

    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::new(self.entity_type.clone(), self.entity_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse_bare_and_namespaced() {
        assert_eq!(EventKind::parse("created"), Some(EventKind::Created));
        assert_eq!(EventKind::parse("comment:deleted"), Some(EventKind::Deleted));
        assert_eq!(EventKind::parse("comment:archived"), None);
    }

    #[test]
    fn test_topic_name() {
        assert_eq!(topic_name("comment", EventKind::Updated), "comment:updated");
    }

    #[test]
    fn test_live_event_decodes_camel_case() {
        let raw = serde_json::json!({
            "eventType": "created",
            "entityId": "42",
            "entityType": "comment",
            "scopeKey": "room-1",
            "body": {"text": "hi"}
        });
        let event: LiveEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind(), Some(EventKind::Created));
        assert_eq!(event.identity(), ItemIdentity::new("comment", "42"));
        assert_eq!(event.scope_key, "room-1");
    }

    #[test]
    fn test_live_event_body_defaults_to_null() {
        let raw = serde_json::json!({
            "eventType": "deleted",
            "entityId": "42",
            "entityType": "comment",
            "scopeKey": "room-1"
        });
        let event: LiveEvent = serde_json::from_value(raw).unwrap();
        assert!(event.body.is_null());
    }
}
