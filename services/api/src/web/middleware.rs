//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes, the shared-secret check on
//! the internal trigger and job routes, and the client address extractor used
//! by the rate limiter.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use reading_log_core::ports::PortError;
use reading_log_core::Caller;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use crate::error::ApiError;
use crate::web::state::AppState;

/// Header carrying the shared secret on `/triggers` and `/jobs` calls.
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

const UNAUTHENTICATED: &str = "You must be logged in to perform this action.";

/// Finds the auth session id: the `session` cookie first, then a bearer token.
fn session_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session="))
        });

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    })
    .filter(|token| !token.is_empty())
}

/// Middleware that validates the auth session and resolves the caller.
///
/// If valid, inserts the [`Caller`] into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers())
        .ok_or_else(|| ApiError::Unauthenticated(UNAUTHENTICATED.to_string()))?;

    let user_id = match state.db.validate_auth_session(token).await {
        Ok(user_id) => user_id,
        Err(PortError::Unauthorized | PortError::NotFound(_)) => {
            return Err(ApiError::Unauthenticated(UNAUTHENTICATED.to_string()))
        }
        Err(e) => {
            error!("Failed to validate auth session: {:?}", e);
            return Err(ApiError::Port(e));
        }
    };

    req.extensions_mut().insert(Caller { user_id });
    Ok(next.run(req).await)
}

/// Middleware for routes only the event runtime and the scheduler may call.
///
/// The request must carry [`INTERNAL_SECRET_HEADER`] equal to the configured
/// secret; anything else is answered with 401.
pub async fn require_internal(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    if !secrets_match(presented, state.config.internal_secret.as_bytes()) {
        warn!(path = %req.uri().path(), "Rejected internal call without a valid secret");
        return Err(ApiError::Unauthenticated(
            "Missing or invalid internal credentials.".to_string(),
        ));
    }
    Ok(next.run(req).await)
}

fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    !expected.is_empty() && bool::from(presented.ct_eq(expected))
}

//=========================================================================================
// Client Address
//=========================================================================================

/// The client address a request came from.
///
/// With `trust_proxy_headers` set, the first `X-Forwarded-For` hop is used when
/// it parses as an IP address. Otherwise, and as the fallback, the socket peer
/// is used, else `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(resolve_client_ip(parts, state.config.trust_proxy_headers))
    }
}

/// First `X-Forwarded-For` hop, if it is a valid address. Normalized through
/// `IpAddr` so one client cannot spread across spellings of its address.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok())
}

fn resolve_client_ip(parts: &Parts, trust_proxy_headers: bool) -> ClientIp {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(&parts.headers) {
            return ClientIp(ip.to_string());
        }
    }

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    ClientIp(peer.unwrap_or_else(|| "unknown".to_string()))
}
