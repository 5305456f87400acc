use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;
use crate::auth::Claims;
use crate::error::AppError;
use crate::metrics::RateLimitMetrics;
use crate::ratelimit::RateLimitResult;

/// Paths that bypass the HTTP rate limiter
const RATE_LIMIT_EXEMPT: &[&str] = &["/health"];

/// API Key authentication middleware
/// Validates X-API-Key header against configured api.key
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // If no API key is configured, allow all requests (development mode)
    let Some(expected_key) = &state.settings.api.key else {
        return Ok(next.run(req).await);
    };

    let api_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    match api_key {
        Some(key) if key == expected_key => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(AppError::Auth("Invalid API key".to_string()))
        }
        None => {
            tracing::warn!("Missing API key header");
            Err(AppError::Auth("Missing API key".to_string()))
        }
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Rate limit key: the peer address, or the forwarded client address when
/// the proxy in front of us is trusted.
pub fn client_key(req: &Request<Body>, trust_forwarded_headers: bool) -> String {
    if trust_forwarded_headers {
        let forwarded = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = req
            .headers()
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Token bucket rate limiting for HTTP requests.
///
/// Returns 429 Too Many Requests with Retry-After header when rate limited.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.rate_limiter.is_enabled() || RATE_LIMIT_EXEMPT.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let key = client_key(&req, state.rate_limiter.config().trust_forwarded_headers);

    match state.rate_limiter.check(&key) {
        RateLimitResult::Allowed {
            remaining,
            limit,
            reset_at,
        } => {
            RateLimitMetrics::record_http_allowed();
            let mut response = next.run(req).await;

            let headers = response.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
                headers.insert("X-RateLimit-Limit", v);
            }
            if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
                headers.insert("X-RateLimit-Remaining", v);
            }
            if let Ok(v) = HeaderValue::from_str(&reset_at.to_string()) {
                headers.insert("X-RateLimit-Reset", v);
            }

            response
        }
        RateLimitResult::Denied {
            retry_after,
            limit,
            reset_at,
        } => {
            RateLimitMetrics::record_http_denied();
            tracing::warn!(
                client = %key,
                path = %req.uri().path(),
                retry_after,
                "Rate limit exceeded"
            );

            rate_limit_response(retry_after, limit, reset_at)
        }
    }
}

/// Build a rate limit error response with proper headers
fn rate_limit_response(retry_after: u64, limit: u32, reset_at: i64) -> Response {
    let body = json!({
        "error": {
            "code": "RATE_LIMITED",
            "message": format!("Too many requests, please retry after {} seconds", retry_after),
            "retry_after": retry_after
        }
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
        headers.insert(header::RETRY_AFTER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
    if let Ok(v) = HeaderValue::from_str(&reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }

    response
}

/// A validated bearer session.
///
/// Extracting it rejects the request with 401 when the token is missing,
/// malformed, expired or revoked.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub claims: Claims,
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Auth("Missing bearer token".to_string()))?
            .to_string();

        let claims = state.tokens.validate(&token)?;

        Ok(Self { token, claims })
    }
}
