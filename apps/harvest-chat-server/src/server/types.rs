use harvest_core::{BuyerId, ChatRoomId, MessageId, SellerId, UserId};
use serde::{Deserialize, Serialize};

use super::core::{MessageRecord, RoomContext};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: &'static str,
}

/// Handshake credentials for the gateway upgrade request.
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayAuthQuery {
    pub(crate) access_token: Option<String>,
    pub(crate) dev_identity: Option<String>,
}

/// The persisted message as broadcast to room members and returned from
/// the history endpoint. Carries sender and room ids so a client can
/// reconcile its own optimistic echo.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessageResponse {
    pub(crate) message_id: MessageId,
    pub(crate) chat_room_id: ChatRoomId,
    pub(crate) sender_id: UserId,
    pub(crate) content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) image_mime: Option<String>,
    pub(crate) is_read: bool,
    pub(crate) created_at_unix: i64,
}

impl From<MessageRecord> for MessageResponse {
    fn from(record: MessageRecord) -> Self {
        Self {
            message_id: record.message_id,
            chat_room_id: record.chat_room_id,
            sender_id: record.sender_id,
            content: record.content,
            image_url: record.image_url,
            image_mime: record.image_mime,
            is_read: record.is_read,
            created_at_unix: record.created_at_unix,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct BuyerResponse {
    pub(crate) buyer_id: BuyerId,
    pub(crate) owner_user_id: UserId,
}

#[derive(Debug, Serialize)]
pub(crate) struct SellerResponse {
    pub(crate) seller_id: SellerId,
    pub(crate) owner_user_id: UserId,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoomResponse {
    pub(crate) chat_room_id: ChatRoomId,
    pub(crate) buyer_id: BuyerId,
    pub(crate) seller_id: SellerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) product_ref: Option<String>,
    pub(crate) created_at_unix: i64,
}

impl From<RoomContext> for RoomResponse {
    fn from(room: RoomContext) -> Self {
        Self {
            chat_room_id: room.chat_room_id,
            buyer_id: room.buyer_id,
            seller_id: room.seller_id,
            product_ref: room.product_ref,
            created_at_unix: room.created_at_unix,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RoomListResponse {
    pub(crate) rooms: Vec<RoomResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageHistoryResponse {
    pub(crate) messages: Vec<MessageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PinProductRequest {
    pub(crate) product_ref: Option<String>,
}
