use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    routing::{get, patch, post},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    core::{AppConfig, AppState},
    handlers::{
        create_buyer, create_seller, get_room_messages, health, list_rooms, metrics,
        set_room_product,
    },
    realtime::chat_ws,
};

/// Build the axum router with global security middleware.
///
/// # Errors
/// Returns an error if configured limits are invalid or if production
/// mode is requested without a token secret.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    if config.environment.is_production() && config.token_secret.is_none() {
        return Err(anyhow!(
            "production requires a token secret: the development identity bypass is \
             disabled there and no credential could ever verify"
        ));
    }
    if config.max_gateway_event_bytes > harvest_protocol::MAX_EVENT_BYTES {
        return Err(anyhow!(
            "gateway event limit cannot exceed protocol max of {} bytes",
            harvest_protocol::MAX_EVENT_BYTES
        ));
    }
    if config.message_rate_window.is_zero() {
        return Err(anyhow!("message rate window must be at least 1 second"));
    }
    if config.message_rate_max_per_window == 0 {
        return Err(anyhow!(
            "message rate cap must allow at least 1 message per window"
        ));
    }
    if config.gateway_outbound_queue == 0 {
        return Err(anyhow!("gateway outbound queue must hold at least 1 event"));
    }

    let cors = build_cors_layer(&config.allowed_origins)?;
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let app_state = AppState::new(config)?;
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/participants/buyers", post(create_buyer))
        .route("/participants/sellers", post(create_seller))
        .route("/rooms", get(list_rooms))
        .route("/rooms/{chat_room_id}/messages", get(get_room_messages))
        .route("/rooms/{chat_room_id}/product", patch(set_room_product))
        .route("/chat/ws", get(chat_ws))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        );
    if let Some(cors) = cors {
        router = router.layer(cors);
    }
    Ok(router)
}

fn build_cors_layer(allowed_origins: &[String]) -> anyhow::Result<Option<CorsLayer>> {
    if allowed_origins.is_empty() {
        return Ok(None);
    }

    let mut origins = Vec::with_capacity(allowed_origins.len());
    for origin in allowed_origins {
        let trimmed = origin.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("allowed origin cannot be empty"));
        }
        origins.push(
            HeaderValue::from_str(trimmed)
                .map_err(|_| anyhow!("allowed origin {trimmed:?} is not a valid header value"))?,
        );
    }

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
    ))
}
