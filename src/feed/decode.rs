//! Push-channel frame decoding.
//!
//! Rules, first match wins:
//! 1. `{"action": "clear"}` -> `Cleared`
//! 2. `{"action": "delete", "id": ..}` -> `Deleted(id)`
//! 3. any object carrying `id` -> `Inserted(full transaction)`
//! 4. anything else is a decode failure.

use serde_json::Value;

use crate::errors::DecodeError;
use crate::types::Transaction;

use super::events::StreamEvent;

pub fn decode(raw: &str) -> Result<StreamEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<StreamEvent, DecodeError> {
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    match obj.get("action").and_then(Value::as_str) {
        Some("clear") => return Ok(StreamEvent::Cleared),
        Some("delete") => {
            return match obj.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => Ok(StreamEvent::Deleted(id.to_string())),
                _ => Err(DecodeError::DeleteWithoutId),
            };
        }
        _ => {}
    }

    if !obj.contains_key("id") {
        return Err(DecodeError::Unrecognized);
    }

    let tx: Transaction = serde_json::from_value(value)
        .map_err(|e| DecodeError::InvalidTransaction(e.to_string()))?;
    if tx.id.is_empty() {
        return Err(DecodeError::InvalidTransaction("empty id".to_string()));
    }
    Ok(StreamEvent::inserted(tx))
}
