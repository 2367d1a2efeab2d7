pub(crate) mod auth;
pub(crate) mod core;
pub(crate) mod errors;
pub(crate) mod gateway_events;
pub(crate) mod handlers;
pub(crate) mod metrics;
pub(crate) mod rate_limit;
pub(crate) mod realtime;
pub(crate) mod registry;
pub(crate) mod rooms;
pub(crate) mod router;
pub(crate) mod store;
pub(crate) mod types;

pub use self::core::{
    AppConfig, Environment, DEFAULT_GATEWAY_OUTBOUND_QUEUE, DEFAULT_JSON_BODY_LIMIT_BYTES,
    DEFAULT_MAX_GATEWAY_EVENT_BYTES, DEFAULT_MESSAGE_RATE_MAX_PER_WINDOW,
    DEFAULT_MESSAGE_RATE_WINDOW_SECS, DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use self::errors::init_tracing;
pub use self::router::build_router;
