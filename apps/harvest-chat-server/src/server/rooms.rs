use harvest_core::{BuyerId, ChatRoomId, SellerId, UserId};

use super::{
    auth::now_unix,
    core::{AppState, RoomContext},
    errors::ChatFailure,
};

/// First-contact authorization: both participants must exist and the
/// caller must own one of them. The room for the pair is created lazily
/// and there is never more than one.
pub(crate) async fn authorize_direct(
    state: &AppState,
    buyer_id: BuyerId,
    seller_id: SellerId,
    caller: &UserId,
) -> Result<RoomContext, ChatFailure> {
    let buyer = state
        .store
        .find_buyer(buyer_id)
        .await?
        .ok_or(ChatFailure::InvalidParticipants)?;
    let seller = state
        .store
        .find_seller(seller_id)
        .await?
        .ok_or(ChatFailure::InvalidParticipants)?;

    if buyer.owner_user_id != *caller && seller.owner_user_id != *caller {
        return Err(ChatFailure::Forbidden);
    }

    state.store.find_or_create_room(&buyer, &seller, now_unix()).await
}

/// Membership gate for every room-scoped action. Deliberately re-run on
/// each call; nothing about room access is cached on the connection.
pub(crate) async fn authorize_membership(
    state: &AppState,
    chat_room_id: ChatRoomId,
    caller: &UserId,
) -> Result<RoomContext, ChatFailure> {
    let room = state
        .store
        .find_room(chat_room_id)
        .await?
        .ok_or(ChatFailure::NotFound)?;
    if !room.is_participant_owner(caller) {
        return Err(ChatFailure::Forbidden);
    }
    Ok(room)
}

/// Set or clear the room's pinned product reference.
pub(crate) async fn pin_room_product(
    state: &AppState,
    chat_room_id: ChatRoomId,
    caller: &UserId,
    product_ref: Option<String>,
) -> Result<RoomContext, ChatFailure> {
    let mut room = authorize_membership(state, chat_room_id, caller).await?;
    let product_ref = product_ref.and_then(|value| {
        let trimmed = value.trim().to_owned();
        (!trimmed.is_empty()).then_some(trimmed)
    });
    state
        .store
        .set_room_product(chat_room_id, product_ref.as_deref())
        .await?;
    room.product_ref = product_ref;
    Ok(room)
}
