use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::auth::{CredentialError, LoginError, TokenError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked until {locked_until}")]
    Locked { locked_until: DateTime<Utc> },

    #[error("Too many requests, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_until: Option<DateTime<Utc>>,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Locked { .. } => StatusCode::LOCKED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::Locked { .. } => "ACCOUNT_LOCKED",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let log_message = self.to_string();

        let client_message = match &self {
            AppError::Config(_) if is_production() => "Configuration error".to_string(),
            AppError::Internal(_) if is_production() => "Internal server error".to_string(),
            _ => log_message.clone(),
        };

        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::debug!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API request rejected"
            );
        }

        let (retry_after, locked_until) = match &self {
            AppError::RateLimited { retry_after } => (Some(*retry_after), None),
            AppError::Locked { locked_until } => (None, Some(*locked_until)),
            _ => (None, None),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
                retry_after,
                locked_until,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after) = retry_after {
            if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }

        response
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Encoding(msg) => AppError::Internal(msg),
            other => AppError::Auth(other.to_string()),
        }
    }
}

impl From<LoginError> for AppError {
    fn from(e: LoginError) -> Self {
        match e {
            LoginError::Locked { locked_until } => AppError::Locked { locked_until },
            LoginError::RateLimited { retry_after } => AppError::RateLimited { retry_after },
            LoginError::InvalidCredentials => AppError::InvalidCredentials,
            LoginError::Token(e) => e.into(),
            LoginError::Store(e) => e.into(),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::AlreadyRegistered(account) => {
                AppError::Conflict(format!("Account {} is already registered", account))
            }
            CredentialError::SecretTooShort { min } => {
                AppError::Validation(format!("Secret must be at least {} characters", min))
            }
            CredentialError::Hashing(msg) => AppError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
