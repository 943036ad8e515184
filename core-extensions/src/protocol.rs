//! Wire format shared by both sides of the sandbox boundary.
//!
//! Every message is a single JSON object serialized to text:
//!
//! | Shape | Meaning |
//! |-------|---------|
//! | `{type, requestId, ...payload}` | request |
//! | `{requestId, result}` / `{requestId, error}` | response |
//! | `{type: "log", result}` | out-of-band diagnostic, never answered |

use serde_json::{Map, Value};

use crate::error::RpcError;

pub const TYPE_FIELD: &str = "type";
pub const REQUEST_ID_FIELD: &str = "requestId";
pub const RESULT_FIELD: &str = "result";
pub const ERROR_FIELD: &str = "error";
pub const LOG_TYPE: &str = "log";

/// Key used when a request payload is not a JSON object.
pub const ARGS_FIELD: &str = "args";

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Request {
        kind: String,
        request_id: u64,
        payload: Value,
    },
    Response {
        request_id: u64,
        outcome: Result<Value, String>,
    },
    Log { message: String },
}

pub fn encode_request(kind: &str, request_id: u64, payload: Value) -> Result<String, RpcError> {
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert(ARGS_FIELD.to_string(), other);
            map
        }
    };
    object.insert(TYPE_FIELD.to_string(), Value::String(kind.to_string()));
    object.insert(REQUEST_ID_FIELD.to_string(), Value::from(request_id));

    serde_json::to_string(&Value::Object(object)).map_err(|e| RpcError::Malformed(e.to_string()))
}

pub fn encode_response(request_id: u64, outcome: Result<Value, String>) -> Result<String, RpcError> {
    let mut object = Map::new();
    object.insert(REQUEST_ID_FIELD.to_string(), Value::from(request_id));
    match outcome {
        Ok(result) => object.insert(RESULT_FIELD.to_string(), result),
        Err(error) => object.insert(ERROR_FIELD.to_string(), Value::String(error)),
    };

    serde_json::to_string(&Value::Object(object)).map_err(|e| RpcError::Malformed(e.to_string()))
}

pub fn encode_log(message: &str) -> Result<String, RpcError> {
    let mut object = Map::new();
    object.insert(TYPE_FIELD.to_string(), Value::String(LOG_TYPE.to_string()));
    object.insert(RESULT_FIELD.to_string(), Value::String(message.to_string()));

    serde_json::to_string(&Value::Object(object)).map_err(|e| RpcError::Malformed(e.to_string()))
}

/// Decode one inbound message.
pub fn decode(text: &str) -> Result<WireMessage, RpcError> {
    let value: Value = serde_json::from_str(text).map_err(|e| RpcError::Malformed(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(RpcError::Malformed("message is not an object".to_string()));
    };

    let kind = match object.remove(TYPE_FIELD) {
        Some(Value::String(kind)) => Some(kind),
        Some(other) => {
            return Err(RpcError::Malformed(format!("non-string type: {}", other)));
        }
        None => None,
    };
    let request_id = object.remove(REQUEST_ID_FIELD).map(parse_request_id).transpose()?;

    match (kind, request_id) {
        (Some(kind), None) if kind == LOG_TYPE => {
            let message = match object.remove(RESULT_FIELD) {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Ok(WireMessage::Log { message })
        }
        (Some(kind), Some(request_id)) => Ok(WireMessage::Request {
            kind,
            request_id,
            payload: Value::Object(object),
        }),
        (None, Some(request_id)) => {
            let outcome = match object.remove(ERROR_FIELD) {
                Some(Value::Null) | None => {
                    Ok(object.remove(RESULT_FIELD).unwrap_or(Value::Null))
                }
                Some(Value::String(error)) => Err(error),
                Some(other) => Err(other.to_string()),
            };
            Ok(WireMessage::Response {
                request_id,
                outcome,
            })
        }
        (Some(kind), None) => Err(RpcError::Malformed(format!(
            "request '{}' without requestId",
            kind
        ))),
        (None, None) => Err(RpcError::Malformed(
            "message has neither type nor requestId".to_string(),
        )),
    }
}

fn parse_request_id(value: Value) -> Result<u64, RpcError> {
    match &value {
        Value::Number(n) => n.as_u64(),
        // Some script runtimes stringify ids
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| RpcError::Malformed(format!("invalid requestId: {}", value)))
}
