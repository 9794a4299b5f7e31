//! Publish gateway request and response types

use relay::Message;
use serde::{Deserialize, Serialize};

// =============================================================================
// RESPONSE BODIES
// =============================================================================

pub const INVALID_PAYLOAD_BODY: &str = "Invalid request payload";
pub const PUBLISH_FAILED_BODY: &str = "Failed to publish message";
pub const PUBLISH_SUCCESS_PREFIX: &str = "Message published successfully: ";

pub fn publish_success_body(message_id: &str) -> String {
    format!("{PUBLISH_SUCCESS_PREFIX}{message_id}")
}

// =============================================================================
// REQUEST DECODING
// =============================================================================

/// Decode a `POST /publish` body.
///
/// Only a JSON object is accepted. Empty bodies, invalid JSON, arrays, a
/// missing `data` field and a non-string `data` all fail the same way.
pub fn decode_message(body: &[u8]) -> Result<Message, serde_json::Error> {
    match serde_json::from_slice::<serde_json::Value>(body)? {
        value @ serde_json::Value::Object(_) => serde_json::from_value(value),
        _ => Err(serde::de::Error::custom("request body must be a JSON object")),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthCheckResponse {
    pub status: String,
    pub service: String,
    pub timestamp: u64,
}
