#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, init_tracing, AppConfig, Environment, DEFAULT_GATEWAY_OUTBOUND_QUEUE,
    DEFAULT_JSON_BODY_LIMIT_BYTES, DEFAULT_MAX_GATEWAY_EVENT_BYTES,
    DEFAULT_MESSAGE_RATE_MAX_PER_WINDOW, DEFAULT_MESSAGE_RATE_WINDOW_SECS,
    DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE, DEFAULT_REQUEST_TIMEOUT_SECS,
};
