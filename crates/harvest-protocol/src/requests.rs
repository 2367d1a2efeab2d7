use harvest_core::{BuyerId, ChatRoomId, MessageId, SellerId};
use serde::Deserialize;

use crate::{Envelope, ProtocolError};

const JOIN_ROOM: &str = "join_room";
const SEND_MESSAGE: &str = "send_message";
const MESSAGE_READ: &str = "message_read";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinRoomRequest {
    pub chat_room_id: ChatRoomId,
}

/// Message submission. The room is addressed either directly by id or by
/// the buyer/seller pair for first contact; the pipeline enforces that
/// exactly one form is present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub chat_room_id: Option<ChatRoomId>,
    pub buyer_id: Option<BuyerId>,
    pub seller_id: Option<SellerId>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub image_mime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub chat_room_id: ChatRoomId,
    pub message_ids: Vec<MessageId>,
}

/// The set of requests a connected client may issue, parsed from an
/// envelope before any handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    JoinRoom(JoinRoomRequest),
    SendMessage(SendMessageRequest),
    MarkRead(MarkReadRequest),
}

impl ClientRequest {
    /// Dispatch an already-parsed envelope into a typed request.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnknownRequestType`] for event types the
    /// gateway does not accept and [`ProtocolError::InvalidRequestPayload`]
    /// when the payload does not match the request's schema.
    pub fn from_envelope(envelope: Envelope<serde_json::Value>) -> Result<Self, ProtocolError> {
        match envelope.t.as_str() {
            JOIN_ROOM => serde_json::from_value::<JoinRoomRequest>(envelope.d)
                .map(Self::JoinRoom)
                .map_err(|_| ProtocolError::InvalidRequestPayload),
            SEND_MESSAGE => serde_json::from_value::<SendMessageRequest>(envelope.d)
                .map(Self::SendMessage)
                .map_err(|_| ProtocolError::InvalidRequestPayload),
            MESSAGE_READ => serde_json::from_value::<MarkReadRequest>(envelope.d)
                .map(Self::MarkRead)
                .map_err(|_| ProtocolError::InvalidRequestPayload),
            other => Err(ProtocolError::UnknownRequestType(other.to_owned())),
        }
    }
}
