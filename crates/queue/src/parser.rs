//! Encode and decode work-unit message bodies.
//!
//! Body layout: `{"endpoint": string, "ingestion_date": "YYYY-MM-DD", "page": integer}`.
//! Extra fields are ignored so producers can add metadata without breaking
//! older workers.

use rawlake_core::WorkUnit;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Serialize a work unit into a queue message body.
pub fn encode_work_unit(unit: &WorkUnit) -> Result<String, QueueError> {
    serde_json::to_string(unit)
        .map_err(|e| QueueError::Encode(format!("Failed to encode work unit {unit}: {e}")))
}

/// Parse a delivered message body into a [`WorkUnit`].
///
/// Invalid JSON, a non-object body, missing fields, a malformed date or a
/// negative page are all [`QueueError::Parse`].
pub fn decode_work_unit(msg: &QueueMessage) -> Result<WorkUnit, QueueError> {
    serde_json::from_str(&msg.body)
        .map_err(|e| QueueError::Parse(format!("Invalid work unit in message {}: {}", msg.id, e)))
}
