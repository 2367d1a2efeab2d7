use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use harvest_core::UserId;
use pasetors::{claims::ClaimsValidationRules, local, token::UntrustedToken, version4::V4, Local};

use super::{core::AppState, errors::ChatFailure};

/// Header carrying the development identity for plain HTTP calls. The
/// gateway handshake takes the same value as a query parameter.
pub(crate) const DEV_IDENTITY_HEADER: &str = "x-dev-identity";

/// Resolve the caller identity from a credential. Verification order is
/// fixed: a bearer token, when present, is always verified against the
/// configured secret, so a valid-looking token can never fall through to
/// the development bypass. The bypass itself only exists outside
/// production. No side effects.
pub(crate) fn verify_credential(
    state: &AppState,
    bearer: Option<&str>,
    dev_identity: Option<&str>,
) -> Result<UserId, ChatFailure> {
    if let Some(token) = bearer {
        let Some(key) = &state.token_key else {
            return Err(ChatFailure::SecretUnconfigured);
        };
        let untrusted =
            UntrustedToken::<Local, V4>::try_from(token).map_err(|_| ChatFailure::Unauthorized)?;
        let validation_rules = ClaimsValidationRules::new();
        let trusted = local::decrypt(key, &untrusted, &validation_rules, None, None)
            .map_err(|_| ChatFailure::Unauthorized)?;
        let claims = trusted.payload_claims().ok_or(ChatFailure::Unauthorized)?;
        let subject = claims
            .get_claim("sub")
            .and_then(serde_json::Value::as_str)
            .ok_or(ChatFailure::Unauthorized)?;
        return UserId::try_from(subject.to_owned()).map_err(|_| ChatFailure::Unauthorized);
    }

    if !state.environment.is_production() {
        if let Some(identity) = dev_identity {
            return UserId::try_from(identity.to_owned()).map_err(|_| ChatFailure::Unauthorized);
        }
    }

    Err(ChatFailure::Unauthorized)
}

pub(crate) fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ChatFailure> {
    let dev_identity = headers
        .get(DEV_IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok());
    verify_credential(state, bearer_token(headers), dev_identity)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    header.strip_prefix("Bearer ")
}

pub(crate) fn now_unix() -> i64 {
    let now = SystemTime::now();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}
