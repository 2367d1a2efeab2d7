#![forbid(unsafe_code)]

mod requests;

use serde::{Deserialize, Serialize};

pub use requests::{ClientRequest, JoinRoomRequest, MarkReadRequest, SendMessageRequest};

/// Current gateway envelope version.
pub const PROTOCOL_VERSION: u16 = 1;
/// Maximum allowed gateway payload bytes. Chat messages are capped at
/// 2000 characters, so frames stay small; the limit exists to bound
/// adversarial input, not legitimate traffic.
pub const MAX_EVENT_BYTES: usize = 32 * 1024;

/// Versioned gateway envelope. Every event, inbound or outbound, uses
/// `{ v, t, d }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope<T> {
    pub v: u16,
    pub t: EventType,
    pub d: T,
}

/// Event type identifier with a strict character allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventType {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_event_type(&value)?;
        Ok(Self(value))
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

/// Parse and validate an incoming envelope at the network boundary.
///
/// # Errors
/// Returns [`ProtocolError`] if the payload exceeds limits, is malformed
/// JSON, carries an unsupported version, or has an invalid event type.
pub fn parse_envelope(input: &[u8]) -> Result<Envelope<serde_json::Value>, ProtocolError> {
    if input.len() > MAX_EVENT_BYTES {
        return Err(ProtocolError::OversizedPayload {
            max: MAX_EVENT_BYTES,
            actual: input.len(),
        });
    }

    let envelope: Envelope<serde_json::Value> = serde_json::from_slice(input)?;
    if envelope.v != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            expected: PROTOCOL_VERSION,
            actual: envelope.v,
        });
    }

    Ok(envelope)
}

pub(crate) fn validate_event_type(value: &str) -> Result<(), ProtocolError> {
    const MAX_LEN: usize = 64;

    if value.is_empty() || value.len() > MAX_LEN {
        return Err(ProtocolError::InvalidEventType);
    }

    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return Ok(());
    }

    Err(ProtocolError::InvalidEventType)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedPayload { max: usize, actual: usize },
    #[error("unsupported envelope version: expected={expected} actual={actual}")]
    UnsupportedVersion { expected: u16, actual: u16 },
    #[error("invalid event type")]
    InvalidEventType,
    #[error("unknown request type `{0}`")]
    UnknownRequestType(String),
    #[error("invalid request payload")]
    InvalidRequestPayload,
    #[error("invalid json payload")]
    InvalidJson,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_envelope, EventType, ProtocolError, MAX_EVENT_BYTES, PROTOCOL_VERSION};

    #[test]
    fn event_type_accepts_valid_identifier() {
        let event_type = EventType::try_from(String::from("send_message")).unwrap();
        assert_eq!(event_type.as_str(), "send_message");
    }

    #[test]
    fn event_type_rejects_invalid_identifier() {
        let error = EventType::try_from(String::from("send-message")).unwrap_err();
        assert_eq!(error, ProtocolError::InvalidEventType);
    }

    #[test]
    fn parse_rejects_unsupported_version() {
        let payload = br#"{"v":7,"t":"join_room","d":{}}"#;
        let error = parse_envelope(payload).unwrap_err();
        assert_eq!(
            error,
            ProtocolError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                actual: 7,
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let payload = br#"{"v":1,"t":"join_room","d":{},"extra":1}"#;
        let error = parse_envelope(payload).unwrap_err();
        assert_eq!(error, ProtocolError::InvalidJson);
    }

    #[test]
    fn parse_rejects_oversized_payload() {
        let mut payload = Vec::from(&br#"{"v":1,"t":"send_message","d":{"content":""#[..]);
        payload.extend(std::iter::repeat(b'a').take(MAX_EVENT_BYTES));
        payload.extend(br#""}}"#);
        let error = parse_envelope(&payload).unwrap_err();
        assert!(matches!(error, ProtocolError::OversizedPayload { .. }));
    }

    #[test]
    fn parse_accepts_valid_payload() {
        let payload =
            br#"{"v":1,"t":"join_room","d":{"chat_room_id":"11111111-2222-3333-4444-555555555555"}}"#;
        let envelope = parse_envelope(payload).unwrap();

        assert_eq!(envelope.v, 1);
        assert_eq!(envelope.t.as_str(), "join_room");
        assert_eq!(
            envelope.d["chat_room_id"],
            "11111111-2222-3333-4444-555555555555"
        );
    }
}
