//! Turning live event bodies into feed items.

use chrono::{DateTime, Utc};

use super::{ReconcileError, Result};
use crate::model::{LiveEvent, MaterializedItem};

/// Builds the feed item a created/updated event describes.
pub trait EventMaterializer: Send + Sync {
    fn materialize(&self, event: &LiveEvent) -> Result<MaterializedItem>;
}

/// Uses the event body as the payload and one of its fields as timestamp.
///
/// The field may hold an RFC 3339 string or epoch milliseconds.
#[derive(Debug, Clone)]
pub struct BodyMaterializer {
    timestamp_field: String,
}

impl BodyMaterializer {
    pub fn new(timestamp_field: impl Into<String>) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
        }
    }

    fn timestamp(&self, event: &LiveEvent) -> Result<DateTime<Utc>> {
        let value = event.body.get(&self.timestamp_field).ok_or_else(|| {
            ReconcileError::Materialize(format!(
                "{}/{} has no '{}' field",
                event.entity_type, event.entity_id, self.timestamp_field
            ))
        })?;

        if let Some(text) = value.as_str() {
            return DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    ReconcileError::Materialize(format!("bad '{}': {}", self.timestamp_field, e))
                });
        }
        value
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| {
                ReconcileError::Materialize(format!(
                    "'{}' is neither RFC 3339 nor epoch millis",
                    self.timestamp_field
                ))
            })
    }
}

impl Default for BodyMaterializer {
    fn default() -> Self {
        Self::new("updatedAt")
    }
}

impl EventMaterializer for BodyMaterializer {
    fn materialize(&self, event: &LiveEvent) -> Result<MaterializedItem> {
        Ok(MaterializedItem::new(
            event.identity(),
            self.timestamp(event)?,
            event.body.clone(),
        ))
    }
}
