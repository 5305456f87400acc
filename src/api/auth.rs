//! Session endpoints: login, logout, refresh, introspection and account provisioning.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::IssuedToken;
use crate::error::{AppError, Result};
use crate::metrics::LoginMetrics;
use crate::server::{AppState, AuthSession};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub account_id: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            token_type: "bearer".to_string(),
            expires_at: issued.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
    /// The blacklist entry is dropped after this instant
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub permissions: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub account_id: String,
    pub password: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub account_id: String,
    pub permissions: Vec<String>,
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let account_id = request.account_id.trim();
    if account_id.is_empty() {
        return Err(AppError::Validation("account_id is required".to_string()));
    }

    // Empty passwords fail at credential verification, after the lockout check

    let issued = state.login_guard.login(account_id, &request.password).await?;
    Ok(Json(issued.into()))
}

/// POST /api/v1/auth/logout - revokes the presented token
pub async fn logout(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<LogoutResponse>> {
    let expires_at = state.tokens.revoke(&session.token)?;
    LoginMetrics::set_blacklist_size(state.tokens.blacklist_len());

    tracing::info!(user_id = %session.claims.sub, "Session revoked");

    Ok(Json(LogoutResponse {
        revoked: true,
        expires_at,
    }))
}

/// POST /api/v1/auth/refresh - new token, same subject and permissions
pub async fn refresh(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<TokenResponse>> {
    let issued = state
        .tokens
        .issue(&session.claims.sub, session.claims.permissions.clone())?;

    tracing::debug!(user_id = %session.claims.sub, "Session refreshed");

    Ok(Json(issued.into()))
}

/// GET /api/v1/auth/me
pub async fn me(session: AuthSession) -> Json<SessionResponse> {
    let claims = session.claims;
    Json(SessionResponse {
        issued_at: claims.issued_at(),
        expires_at: claims.expires_at(),
        user_id: claims.sub,
        permissions: claims.permissions,
    })
}

/// POST /api/v1/auth/register - API key protected
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let account_id = request.account_id.trim();
    if account_id.is_empty() {
        return Err(AppError::Validation("account_id is required".to_string()));
    }

    let record = state
        .credentials
        .register(account_id, &request.password, request.permissions)
        .await?;

    tracing::info!(account_id = %record.account_id, "Account provisioned");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            account_id: record.account_id,
            permissions: record.permissions,
        }),
    ))
}
