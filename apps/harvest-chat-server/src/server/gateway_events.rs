use harvest_core::{ChatRoomId, MessageId, UserId};
use harvest_protocol::{Envelope, EventType, PROTOCOL_VERSION};
use serde::Serialize;

use super::types::MessageResponse;

pub(crate) const READY_EVENT: &str = "ready";
pub(crate) const JOINED_ROOM_EVENT: &str = "joined_room";
pub(crate) const NEW_MESSAGE_EVENT: &str = "new_message";
pub(crate) const MESSAGES_READ_EVENT: &str = "messages_read";
pub(crate) const MESSAGES_READ_ACK_EVENT: &str = "messages_read_ack";
pub(crate) const ERROR_EVENT: &str = "error_event";

pub(crate) const JOIN_ROOM_ERROR: &str = "join_room_error";
pub(crate) const SEND_MESSAGE_ERROR: &str = "send_message_error";
pub(crate) const MESSAGE_READ_ERROR: &str = "message_read_error";
pub(crate) const RATE_LIMITED_ERROR: &str = "rate_limited";
pub(crate) const INVALID_PAYLOAD_ERROR: &str = "invalid_payload";

pub(crate) struct GatewayEvent {
    pub(crate) event_type: &'static str,
    pub(crate) payload: String,
}

fn build_event<T: Serialize>(event_type: &'static str, data: T) -> GatewayEvent {
    let envelope = Envelope {
        v: PROTOCOL_VERSION,
        t: EventType::try_from(event_type.to_owned()).unwrap_or_else(|_| {
            EventType::try_from(String::from(ERROR_EVENT)).expect("valid event type")
        }),
        d: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
    };

    GatewayEvent {
        event_type,
        payload: serde_json::to_string(&envelope)
            .unwrap_or_else(|_| String::from(r#"{"v":1,"t":"error_event","d":{}}"#)),
    }
}

#[derive(Serialize)]
struct ReadyPayload<'a> {
    user_id: &'a UserId,
}

pub(crate) fn ready(user_id: &UserId) -> GatewayEvent {
    build_event(READY_EVENT, ReadyPayload { user_id })
}

#[derive(Serialize)]
struct JoinedRoomPayload {
    chat_room_id: ChatRoomId,
}

pub(crate) fn joined_room(chat_room_id: ChatRoomId) -> GatewayEvent {
    build_event(JOINED_ROOM_EVENT, JoinedRoomPayload { chat_room_id })
}

pub(crate) fn new_message(message: &MessageResponse) -> GatewayEvent {
    build_event(NEW_MESSAGE_EVENT, message)
}

#[derive(Serialize)]
struct MessagesReadPayload<'a> {
    chat_room_id: ChatRoomId,
    message_ids: &'a [MessageId],
}

pub(crate) fn messages_read(chat_room_id: ChatRoomId, message_ids: &[MessageId]) -> GatewayEvent {
    build_event(
        MESSAGES_READ_EVENT,
        MessagesReadPayload {
            chat_room_id,
            message_ids,
        },
    )
}

pub(crate) fn messages_read_ack(
    chat_room_id: ChatRoomId,
    message_ids: &[MessageId],
) -> GatewayEvent {
    build_event(
        MESSAGES_READ_ACK_EVENT,
        MessagesReadPayload {
            chat_room_id,
            message_ids,
        },
    )
}

#[derive(Serialize)]
struct ErrorEventPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

pub(crate) fn error_event(kind: &'static str, message: Option<&'static str>) -> GatewayEvent {
    build_event(ERROR_EVENT, ErrorEventPayload { kind, message })
}
