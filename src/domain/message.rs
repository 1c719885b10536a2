use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod events {
    pub const AUTH_REQUEST: &str = "authRequest";
    pub const AUTH_RESPONSE: &str = "authResponse";
    pub const STATUS_UPDATE_REQUEST: &str = "statusUpdateRequest";
    pub const STATUS_UPDATE_RESPONSE: &str = "statusUpdateResponse";
    pub const ADD_ERROR_RESPONSE: &str = "addErrorResponse";
    pub const START_CONTAINER_REQUEST: &str = "startContainerRequest";
    pub const JOB_REQUEST: &str = "jobRequest";
    /// Used for frames that could not be attributed to any event.
    pub const ERROR: &str = "error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Forbidden,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame is not a valid message envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has an empty event name")]
    EmptyEvent,
}

/// Decoded inbound frame. `data` is `Null` when the sender omitted it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

pub fn encode_message<T: Serialize>(event: &str, data: &T) -> Result<String, CodecError> {
    serde_json::to_string(&Envelope { event, data }).map_err(CodecError::from)
}

pub fn encode_error(event: &str, code: ErrorCode, message: &str) -> String {
    serde_json::json!({
        "event": event,
        "code": code.as_u16(),
        "data": { "message": message },
    })
    .to_string()
}

pub fn decode_frame(text: &str) -> Result<InboundFrame, CodecError> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    if frame.event.trim().is_empty() {
        return Err(CodecError::EmptyEvent);
    }
    Ok(frame)
}
