use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use harvest_core::{validate_message_content, BuyerId, ChatRoomId, SellerId, UserId};
use harvest_protocol::{
    parse_envelope, ClientRequest, JoinRoomRequest, MarkReadRequest, SendMessageRequest,
};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::{
    auth::{bearer_token, now_unix, verify_credential},
    core::{AppState, ConnectionControl},
    errors::ChatFailure,
    gateway_events::{self, GatewayEvent},
    metrics::{
        record_gateway_event_dropped, record_gateway_event_emitted,
        record_gateway_event_parse_rejected, record_rate_limit_hit, record_ws_disconnect,
    },
    rooms::{authorize_direct, authorize_membership},
    types::{GatewayAuthQuery, MessageResponse},
};

pub(crate) async fn chat_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<GatewayAuthQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ChatFailure> {
    let token = query
        .access_token
        .as_deref()
        .or_else(|| bearer_token(&headers));
    // Handshake failures reject the upgrade outright; a connection that
    // never authenticates never reaches any room-capable state.
    let identity = verify_credential(&state, token, query.dev_identity.as_deref())?;

    Ok(ws.on_upgrade(move |socket| async move {
        handle_connection(state, socket, identity).await;
    }))
}

#[allow(clippy::too_many_lines)]
pub(crate) async fn handle_connection(state: AppState, socket: WebSocket, identity: UserId) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let slow_consumer_disconnect = Arc::new(AtomicBool::new(false));

    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<String>(state.runtime.gateway_outbound_queue);
    let (control_tx, mut control_rx) = watch::channel(ConnectionControl::Open);
    state.registry.write().await.attach(&identity, connection_id);
    state
        .connection_controls
        .write()
        .await
        .insert(connection_id, control_tx);

    let ready_event = gateway_events::ready(&identity);
    let _ = outbound_tx.send(ready_event.payload).await;
    record_gateway_event_emitted("connection", ready_event.event_type);

    let slow_consumer_disconnect_send = Arc::clone(&slow_consumer_disconnect);
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if sink.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                control_change = control_rx.changed() => {
                    if control_change.is_ok() && *control_rx.borrow() == ConnectionControl::Close {
                        slow_consumer_disconnect_send.store(true, Ordering::Relaxed);
                        record_ws_disconnect("slow_consumer");
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: 1008,
                                reason: "slow_consumer".into(),
                            })))
                            .await;
                        break;
                    }
                }
                maybe_payload = outbound_rx.recv() => {
                    match maybe_payload {
                        Some(payload) => {
                            if sink.send(Message::Text(payload.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let mut disconnect_reason = "connection_closed";
    while let Some(incoming) = stream.next().await {
        let Ok(message) = incoming else {
            disconnect_reason = "socket_error";
            break;
        };

        let payload: Vec<u8> = match message {
            Message::Text(text) => {
                if text.len() > state.runtime.max_gateway_event_bytes {
                    disconnect_reason = "event_too_large";
                    break;
                }
                text.as_bytes().to_vec()
            }
            Message::Binary(bytes) => {
                if bytes.len() > state.runtime.max_gateway_event_bytes {
                    disconnect_reason = "event_too_large";
                    break;
                }
                bytes.to_vec()
            }
            Message::Close(_) => {
                disconnect_reason = "client_close";
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        // Requests on one connection are handled to completion in
        // arrival order; only other connections interleave.
        let request = match parse_envelope(&payload).and_then(ClientRequest::from_envelope) {
            Ok(request) => request,
            Err(_) => {
                record_gateway_event_parse_rejected("ingress", "invalid_envelope");
                send_direct(
                    &outbound_tx,
                    &gateway_events::error_event(
                        gateway_events::INVALID_PAYLOAD_ERROR,
                        Some("Invalid payload"),
                    ),
                );
                continue;
            }
        };

        match request {
            ClientRequest::JoinRoom(request) => {
                if let Err(failure) =
                    handle_join_room(&state, &identity, connection_id, &outbound_tx, request).await
                {
                    send_direct(
                        &outbound_tx,
                        &gateway_events::error_event(
                            gateway_events::JOIN_ROOM_ERROR,
                            failure.client_message(),
                        ),
                    );
                }
            }
            ClientRequest::SendMessage(request) => {
                if let Err(failure) =
                    handle_send_message(&state, &identity, connection_id, request).await
                {
                    let kind = if failure == ChatFailure::RateLimited {
                        gateway_events::RATE_LIMITED_ERROR
                    } else {
                        gateway_events::SEND_MESSAGE_ERROR
                    };
                    send_direct(
                        &outbound_tx,
                        &gateway_events::error_event(kind, failure.client_message()),
                    );
                }
            }
            ClientRequest::MarkRead(request) => {
                if let Err(failure) =
                    handle_mark_read(&state, &identity, connection_id, &outbound_tx, request).await
                {
                    send_direct(
                        &outbound_tx,
                        &gateway_events::error_event(
                            gateway_events::MESSAGE_READ_ERROR,
                            failure.client_message(),
                        ),
                    );
                }
            }
        }
    }

    if !slow_consumer_disconnect.load(Ordering::Relaxed) {
        record_ws_disconnect(disconnect_reason);
    }
    remove_connection(&state, &identity, connection_id).await;
    send_task.abort();
}

pub(crate) async fn handle_join_room(
    state: &AppState,
    identity: &UserId,
    connection_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    request: JoinRoomRequest,
) -> Result<(), ChatFailure> {
    let room = authorize_membership(state, request.chat_room_id, identity).await?;

    state
        .room_groups
        .write()
        .await
        .entry(room.chat_room_id)
        .or_default()
        .insert(connection_id, outbound_tx.clone());

    send_direct(outbound_tx, &gateway_events::joined_room(room.chat_room_id));
    tracing::debug!(
        event = "gateway.room.join",
        chat_room_id = %room.chat_room_id,
        connection_id = %connection_id
    );
    Ok(())
}

struct SendSubmission {
    target: SendTarget,
    content: String,
    image_url: Option<String>,
    image_mime: Option<String>,
}

enum SendTarget {
    Room(ChatRoomId),
    Pair {
        buyer_id: BuyerId,
        seller_id: SellerId,
    },
}

fn validate_send_payload(request: SendMessageRequest) -> Result<SendSubmission, ChatFailure> {
    let target = match (request.chat_room_id, request.buyer_id, request.seller_id) {
        (Some(chat_room_id), None, None) => SendTarget::Room(chat_room_id),
        (None, Some(buyer_id), Some(seller_id)) => SendTarget::Pair {
            buyer_id,
            seller_id,
        },
        _ => return Err(ChatFailure::InvalidPayload),
    };

    let content = request
        .content
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_owned();
    validate_message_content(&content).map_err(|_| ChatFailure::InvalidPayload)?;

    let image_url = request.image_url.and_then(|value| {
        let trimmed = value.trim().to_owned();
        (!trimmed.is_empty()).then_some(trimmed)
    });
    if content.is_empty() && image_url.is_none() {
        return Err(ChatFailure::InvalidPayload);
    }

    let image_mime = match (&image_url, request.image_mime) {
        (_, None) => None,
        (None, Some(_)) => return Err(ChatFailure::InvalidPayload),
        (Some(_), Some(raw)) => {
            let trimmed = raw.trim().to_owned();
            if trimmed.parse::<mime::Mime>().is_err() {
                return Err(ChatFailure::InvalidPayload);
            }
            Some(trimmed)
        }
    };

    Ok(SendSubmission {
        target,
        content,
        image_url,
        image_mime,
    })
}

pub(crate) async fn handle_send_message(
    state: &AppState,
    identity: &UserId,
    connection_id: Uuid,
    request: SendMessageRequest,
) -> Result<MessageResponse, ChatFailure> {
    // The throughput gate runs before any other validation; a denied
    // call does no further work.
    if !state.message_limiter.write().await.allow(connection_id) {
        record_rate_limit_hit("gateway", "send_message");
        return Err(ChatFailure::RateLimited);
    }

    let submission = validate_send_payload(request)?;
    let room = match submission.target {
        SendTarget::Room(chat_room_id) => {
            authorize_membership(state, chat_room_id, identity).await?
        }
        SendTarget::Pair {
            buyer_id,
            seller_id,
        } => authorize_direct(state, buyer_id, seller_id, identity).await?,
    };

    let record = state
        .store
        .create_message(
            room.chat_room_id,
            identity,
            submission.content,
            submission.image_url,
            submission.image_mime,
            now_unix(),
        )
        .await?;

    // Broadcast strictly after the durable write, to every connection
    // joined to the room including the sender's other devices.
    let response = MessageResponse::from(record);
    broadcast_room_event(
        state,
        room.chat_room_id,
        &gateway_events::new_message(&response),
        None,
    )
    .await;
    Ok(response)
}

pub(crate) async fn handle_mark_read(
    state: &AppState,
    identity: &UserId,
    connection_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    request: MarkReadRequest,
) -> Result<(), ChatFailure> {
    if request.message_ids.is_empty() {
        return Err(ChatFailure::InvalidPayload);
    }
    let room = authorize_membership(state, request.chat_room_id, identity).await?;

    state
        .store
        .mark_messages_read(room.chat_room_id, identity, &request.message_ids)
        .await?;

    // Receivers get the requested id list, not the changed subset, and
    // are expected to be idempotent about already-read messages.
    broadcast_room_event(
        state,
        room.chat_room_id,
        &gateway_events::messages_read(room.chat_room_id, &request.message_ids),
        Some(connection_id),
    )
    .await;
    send_direct(
        outbound_tx,
        &gateway_events::messages_read_ack(room.chat_room_id, &request.message_ids),
    );
    Ok(())
}

fn send_direct(outbound_tx: &mpsc::Sender<String>, event: &GatewayEvent) {
    match outbound_tx.try_send(event.payload.clone()) {
        Ok(()) => record_gateway_event_emitted("connection", event.event_type),
        Err(mpsc::error::TrySendError::Closed(_)) => {
            record_gateway_event_dropped("connection", event.event_type, "closed");
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            record_gateway_event_dropped("connection", event.event_type, "full_queue");
        }
    }
}

pub(crate) async fn broadcast_room_event(
    state: &AppState,
    chat_room_id: ChatRoomId,
    event: &GatewayEvent,
    exclude_connection: Option<Uuid>,
) {
    let mut slow_connections = Vec::new();
    let mut delivered = 0usize;
    let mut groups = state.room_groups.write().await;
    if let Some(listeners) = groups.get_mut(&chat_room_id) {
        listeners.retain(|connection_id, sender| {
            if Some(*connection_id) == exclude_connection {
                return true;
            }
            match sender.try_send(event.payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    record_gateway_event_dropped("room", event.event_type, "closed");
                    false
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    record_gateway_event_dropped("room", event.event_type, "full_queue");
                    slow_connections.push(*connection_id);
                    false
                }
            }
        });
        if listeners.is_empty() {
            groups.remove(&chat_room_id);
        }
    }
    drop(groups);

    close_slow_connections(state, slow_connections).await;
    if delivered > 0 {
        tracing::debug!(
            event = "gateway.event.emit",
            scope = "room",
            event_type = event.event_type,
            delivered
        );
        for _ in 0..delivered {
            record_gateway_event_emitted("room", event.event_type);
        }
    }
}

async fn close_slow_connections(state: &AppState, slow_connections: Vec<Uuid>) {
    if slow_connections.is_empty() {
        return;
    }

    let controls = state.connection_controls.read().await;
    for connection_id in slow_connections {
        if let Some(control) = controls.get(&connection_id) {
            let _ = control.send(ConnectionControl::Close);
        }
    }
}

/// Single departure path: disconnect detaches the registry entry, every
/// room group membership, the control channel, and the rate-limiter
/// window for the connection.
pub(crate) async fn remove_connection(state: &AppState, identity: &UserId, connection_id: Uuid) {
    state.registry.write().await.detach(identity, connection_id);
    state
        .connection_controls
        .write()
        .await
        .remove(&connection_id);
    state.message_limiter.write().await.forget(connection_id);

    let mut groups = state.room_groups.write().await;
    groups.retain(|_, listeners| {
        listeners.remove(&connection_id);
        !listeners.is_empty()
    });
}
