use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use harvest_core::ChatRoomId;

use super::{
    auth::{authenticate, now_unix},
    core::{AppState, METRICS_TEXT_CONTENT_TYPE},
    errors::ChatFailure,
    metrics::render_metrics,
    rooms::{authorize_membership, pin_room_product},
    types::{
        BuyerResponse, HealthResponse, MessageHistoryResponse, MessageResponse, PinProductRequest,
        RoomListResponse, RoomResponse, SellerResponse,
    },
};

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn metrics() -> Response {
    ([(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)], render_metrics()).into_response()
}

pub(crate) async fn create_buyer(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BuyerResponse>, ChatFailure> {
    let caller = authenticate(&state, &headers)?;
    let record = state.store.create_buyer(&caller, now_unix()).await?;
    Ok(Json(BuyerResponse {
        buyer_id: record.buyer_id,
        owner_user_id: record.owner_user_id,
    }))
}

pub(crate) async fn create_seller(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SellerResponse>, ChatFailure> {
    let caller = authenticate(&state, &headers)?;
    let record = state.store.create_seller(&caller, now_unix()).await?;
    Ok(Json(SellerResponse {
        seller_id: record.seller_id,
        owner_user_id: record.owner_user_id,
    }))
}

pub(crate) async fn list_rooms(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RoomListResponse>, ChatFailure> {
    let caller = authenticate(&state, &headers)?;
    let rooms = state.store.list_rooms_for_owner(&caller).await?;
    Ok(Json(RoomListResponse {
        rooms: rooms.into_iter().map(RoomResponse::from).collect(),
    }))
}

/// Message history for a room, the fetch a client issues after
/// `joined_room`. Membership is checked on every call.
pub(crate) async fn get_room_messages(
    State(state): State<AppState>,
    Path(chat_room_id): Path<ChatRoomId>,
    headers: HeaderMap,
) -> Result<Json<MessageHistoryResponse>, ChatFailure> {
    let caller = authenticate(&state, &headers)?;
    let room = authorize_membership(&state, chat_room_id, &caller).await?;
    let messages = state.store.list_messages(room.chat_room_id).await?;
    Ok(Json(MessageHistoryResponse {
        messages: messages.into_iter().map(MessageResponse::from).collect(),
    }))
}

pub(crate) async fn set_room_product(
    State(state): State<AppState>,
    Path(chat_room_id): Path<ChatRoomId>,
    headers: HeaderMap,
    Json(payload): Json<PinProductRequest>,
) -> Result<Json<RoomResponse>, ChatFailure> {
    let caller = authenticate(&state, &headers)?;
    let room = pin_room_product(&state, chat_room_id, &caller, payload.product_ref).await?;
    Ok(Json(RoomResponse::from(room)))
}
