use std::{net::SocketAddr, time::Duration};

use axum::{body::Body, http::Request, http::StatusCode};
use futures_util::{SinkExt, StreamExt};
use harvest_chat_server::{build_router, AppConfig, Environment};
use pasetors::{claims::Claims, keys::SymmetricKey, local, version4::V4};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};
use tower::ServiceExt;

const TEST_SECRET: &str = "network-flow-secret";
const CLIENT_IP: &str = "203.0.113.44";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_app() -> axum::Router {
    build_router(&AppConfig {
        environment: Environment::Development,
        token_secret: Some(String::from(TEST_SECRET)),
        rate_limit_requests_per_minute: 400,
        request_timeout: Duration::from_secs(2),
        ..AppConfig::default()
    })
    .expect("router should build")
}

fn mint_token(subject: &str) -> String {
    let digest = Sha256::digest(TEST_SECRET.as_bytes());
    let key = SymmetricKey::<V4>::from(digest.as_slice()).expect("key should build");
    let mut claims = Claims::new().expect("claims should build");
    claims.subject(subject).expect("subject should set");
    local::encrypt(&key, &claims, None, None).expect("token should mint")
}

async fn parse_json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");
    serde_json::from_slice(&body).expect("response body should be valid json")
}

async fn post_json(app: &axum::Router, uri: &str, token: &str, body: Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::from(body.to_string()))
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should execute");
    assert_eq!(response.status(), StatusCode::OK);
    parse_json_body(response).await
}

async fn get_json(app: &axum::Router, uri: &str, token: &str) -> Value {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should execute");
    assert_eq!(response.status(), StatusCode::OK);
    parse_json_body(response).await
}

async fn spawn_server(app: axum::Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener addr should be readable");
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("server should run without errors");
    });
    (addr, server)
}

async fn connect_gateway(addr: SocketAddr, query: &str) -> WsStream {
    let ws_url = format!("ws://{addr}/chat/ws?{query}");
    let mut ws_request = ws_url
        .into_client_request()
        .expect("websocket request should build");
    ws_request
        .headers_mut()
        .insert("x-forwarded-for", http::HeaderValue::from_static(CLIENT_IP));
    let (socket, _response) = connect_async(ws_request)
        .await
        .expect("websocket handshake should succeed");
    socket
}

async fn next_text_event(socket: &mut WsStream) -> Value {
    let event = socket
        .next()
        .await
        .expect("event should be emitted")
        .expect("event should decode");
    let text = event.into_text().expect("event should be text");
    serde_json::from_str(&text).expect("event should be valid json")
}

async fn next_event_of_type(socket: &mut WsStream, event_type: &str) -> Value {
    for _ in 0..8 {
        let event = next_text_event(socket).await;
        if event["t"] == event_type {
            return event;
        }
    }
    panic!("expected event type {event_type}");
}

async fn send_event(socket: &mut WsStream, event: Value) {
    socket
        .send(Message::Text(event.to_string().into()))
        .await
        .expect("event should send");
}

#[tokio::test]
async fn first_contact_message_flow_works_over_network() {
    let app = test_app();
    let buyer_token = mint_token("farmer-a");
    let seller_token = mint_token("coop-b");

    let buyer = post_json(&app, "/participants/buyers", &buyer_token, json!({})).await;
    let seller = post_json(&app, "/participants/sellers", &seller_token, json!({})).await;
    let buyer_id = buyer["buyer_id"].as_str().expect("buyer id should exist");
    let seller_id = seller["seller_id"].as_str().expect("seller id should exist");

    let (addr, server) = spawn_server(app.clone()).await;

    let mut buyer_socket = connect_gateway(addr, &format!("access_token={buyer_token}")).await;
    let ready = next_text_event(&mut buyer_socket).await;
    assert_eq!(ready["t"], "ready");
    assert_eq!(ready["d"]["user_id"], "farmer-a");

    // First contact by pair: the room is created and the message
    // persists even though nobody has joined the broadcast group yet.
    send_event(
        &mut buyer_socket,
        json!({
            "v": 1,
            "t": "send_message",
            "d": { "buyer_id": buyer_id, "seller_id": seller_id, "content": "Hi" }
        }),
    )
    .await;

    let mut rooms = get_json(&app, "/rooms", &buyer_token).await;
    for _ in 0..50 {
        if !rooms["rooms"].as_array().expect("rooms should be a list").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        rooms = get_json(&app, "/rooms", &buyer_token).await;
    }
    let chat_room_id = rooms["rooms"][0]["chat_room_id"]
        .as_str()
        .expect("room id should exist")
        .to_owned();

    send_event(
        &mut buyer_socket,
        json!({ "v": 1, "t": "join_room", "d": { "chat_room_id": chat_room_id } }),
    )
    .await;
    let joined = next_event_of_type(&mut buyer_socket, "joined_room").await;
    assert_eq!(joined["d"]["chat_room_id"], chat_room_id.as_str());

    let mut seller_socket = connect_gateway(addr, &format!("access_token={seller_token}")).await;
    let ready = next_text_event(&mut seller_socket).await;
    assert_eq!(ready["t"], "ready");
    send_event(
        &mut seller_socket,
        json!({ "v": 1, "t": "join_room", "d": { "chat_room_id": chat_room_id } }),
    )
    .await;
    next_event_of_type(&mut seller_socket, "joined_room").await;

    // An image-only message reaches both joined connections with empty
    // content and the image fields intact.
    send_event(
        &mut seller_socket,
        json!({
            "v": 1,
            "t": "send_message",
            "d": {
                "chat_room_id": chat_room_id,
                "image_url": "https://img.harvest.example/y.png",
                "image_mime": "image/png"
            }
        }),
    )
    .await;

    let broadcast_to_buyer = next_event_of_type(&mut buyer_socket, "new_message").await;
    assert_eq!(broadcast_to_buyer["d"]["content"], "");
    assert_eq!(
        broadcast_to_buyer["d"]["image_url"],
        "https://img.harvest.example/y.png"
    );
    assert_eq!(broadcast_to_buyer["d"]["sender_id"], "coop-b");
    let broadcast_to_seller = next_event_of_type(&mut seller_socket, "new_message").await;
    assert_eq!(broadcast_to_seller["d"]["content"], "");
    let image_message_id = broadcast_to_buyer["d"]["message_id"]
        .as_str()
        .expect("message id should exist")
        .to_owned();

    // The buyer marks the seller's message read: the seller is
    // notified, the buyer gets a separate ack.
    send_event(
        &mut buyer_socket,
        json!({
            "v": 1,
            "t": "message_read",
            "d": { "chat_room_id": chat_room_id, "message_ids": [image_message_id] }
        }),
    )
    .await;
    let notified = next_event_of_type(&mut seller_socket, "messages_read").await;
    assert_eq!(notified["d"]["message_ids"][0], image_message_id.as_str());
    let ack = next_event_of_type(&mut buyer_socket, "messages_read_ack").await;
    assert_eq!(ack["d"]["chat_room_id"], chat_room_id.as_str());

    let history = get_json(
        &app,
        &format!("/rooms/{chat_room_id}/messages"),
        &buyer_token,
    )
    .await;
    let messages = history["messages"].as_array().expect("history should list");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "Hi");
    assert_eq!(messages[0]["sender_id"], "farmer-a");
    assert_eq!(messages[1]["is_read"], true);

    // The pinned product reference is mutable after room creation.
    let pin = Request::builder()
        .method("PATCH")
        .uri(format!("/rooms/{chat_room_id}/product"))
        .header("authorization", format!("Bearer {seller_token}"))
        .header("content-type", "application/json")
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::from(json!({ "product_ref": "lot-2207" }).to_string()))
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(pin)
        .await
        .expect("request should execute");
    assert_eq!(response.status(), StatusCode::OK);
    let pinned = parse_json_body(response).await;
    assert_eq!(pinned["product_ref"], "lot-2207");

    buyer_socket
        .close(None)
        .await
        .expect("socket close should succeed");
    seller_socket
        .close(None)
        .await
        .expect("socket close should succeed");
    server.abort();
}

#[tokio::test]
async fn forbidden_join_leaves_the_connection_authenticated() {
    let app = test_app();
    let buyer_token = mint_token("farmer-a");
    let seller_token = mint_token("coop-b");

    let buyer = post_json(&app, "/participants/buyers", &buyer_token, json!({})).await;
    let seller = post_json(&app, "/participants/sellers", &seller_token, json!({})).await;

    let (addr, server) = spawn_server(app.clone()).await;

    let mut buyer_socket = connect_gateway(addr, &format!("access_token={buyer_token}")).await;
    next_event_of_type(&mut buyer_socket, "ready").await;
    send_event(
        &mut buyer_socket,
        json!({
            "v": 1,
            "t": "send_message",
            "d": {
                "buyer_id": buyer["buyer_id"],
                "seller_id": seller["seller_id"],
                "content": "Hi"
            }
        }),
    )
    .await;

    let mut rooms = get_json(&app, "/rooms", &buyer_token).await;
    for _ in 0..50 {
        if !rooms["rooms"].as_array().expect("rooms should be a list").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        rooms = get_json(&app, "/rooms", &buyer_token).await;
    }
    let chat_room_id = rooms["rooms"][0]["chat_room_id"]
        .as_str()
        .expect("room id should exist")
        .to_owned();

    let lurker_token = mint_token("lurker");
    let mut lurker_socket = connect_gateway(addr, &format!("access_token={lurker_token}")).await;
    next_event_of_type(&mut lurker_socket, "ready").await;

    send_event(
        &mut lurker_socket,
        json!({ "v": 1, "t": "join_room", "d": { "chat_room_id": chat_room_id } }),
    )
    .await;
    let rejection = next_event_of_type(&mut lurker_socket, "error_event").await;
    assert_eq!(rejection["d"]["type"], "join_room_error");
    assert_eq!(rejection["d"]["message"], "Forbidden");

    // The connection is still open and still authenticated: a second
    // request is answered rather than dropped.
    send_event(
        &mut lurker_socket,
        json!({
            "v": 1,
            "t": "join_room",
            "d": { "chat_room_id": "11111111-2222-3333-4444-555555555555" }
        }),
    )
    .await;
    let second = next_event_of_type(&mut lurker_socket, "error_event").await;
    assert_eq!(second["d"]["type"], "join_room_error");
    assert_eq!(second["d"]["message"], "Not found");

    server.abort();
}

#[tokio::test]
async fn development_identity_completes_the_handshake() {
    let (addr, server) = spawn_server(test_app()).await;

    let mut socket = connect_gateway(addr, "dev_identity=dev:carol").await;
    let ready = next_text_event(&mut socket).await;
    assert_eq!(ready["t"], "ready");
    assert_eq!(ready["d"]["user_id"], "dev:carol");

    socket.close(None).await.expect("socket close should succeed");
    server.abort();
}
