use axum::{http::StatusCode, response::IntoResponse, Json};

use super::{
    metrics::{record_auth_failure, record_rate_limit_hit},
    types::ErrorBody,
};

/// Everything that can go wrong while serving a chat request, HTTP or
/// gateway. `SecretUnconfigured` is kept apart from `Unauthorized` so a
/// missing signing secret shows up as the server fault it is instead of
/// blending into ordinary credential rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChatFailure {
    Unauthorized,
    SecretUnconfigured,
    Forbidden,
    NotFound,
    InvalidParticipants,
    InvalidPayload,
    RateLimited,
    Internal,
}

impl ChatFailure {
    /// Short description safe to echo to a client in an `error_event`.
    /// Internal faults stay opaque.
    pub(crate) fn client_message(self) -> Option<&'static str> {
        match self {
            Self::Unauthorized | Self::SecretUnconfigured => Some("Unauthorized"),
            Self::Forbidden => Some("Forbidden"),
            Self::NotFound => Some("Not found"),
            Self::InvalidParticipants => Some("Invalid participants"),
            Self::InvalidPayload => Some("Invalid payload"),
            Self::RateLimited => Some("Rate limited"),
            Self::Internal => None,
        }
    }
}

impl std::fmt::Display for ChatFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl IntoResponse for ChatFailure {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Unauthorized => record_auth_failure("unauthorized"),
            Self::SecretUnconfigured => {
                tracing::error!(
                    event = "auth.secret_unconfigured",
                    "bearer token presented but no token secret is configured"
                );
                record_auth_failure("secret_unconfigured");
            }
            Self::Forbidden => record_auth_failure("forbidden"),
            Self::RateLimited => record_rate_limit_hit("http", "chat"),
            Self::NotFound
            | Self::InvalidParticipants
            | Self::InvalidPayload
            | Self::Internal => {}
        }

        match self {
            Self::Unauthorized | Self::SecretUnconfigured => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "unauthorized",
                }),
            )
                .into_response(),
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(ErrorBody { error: "forbidden" }),
            )
                .into_response(),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody { error: "not_found" }),
            )
                .into_response(),
            Self::InvalidParticipants => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: "invalid_participants",
                }),
            )
                .into_response(),
            Self::InvalidPayload => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "invalid_payload",
                }),
            )
                .into_response(),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorBody {
                    error: "rate_limited",
                }),
            )
                .into_response(),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "internal_error",
                }),
            )
                .into_response(),
        }
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
