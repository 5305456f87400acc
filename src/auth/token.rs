//! Signed session tokens with an in-memory revocation blacklist.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;

use super::claims::{Claims, TOKEN_TYPE_ACCESS};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Token expired")]
    Expired,
    #[error("Token has been revoked")]
    Revoked,
    #[error("Failed to sign token: {0}")]
    Encoding(String),
}

/// A freshly minted token and its expiry
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    audience: Option<String>,
    validity: Duration,
    /// revoked token -> its natural expiry (Unix seconds)
    blacklist: DashMap<String, i64>,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            validity: Duration::hours(config.expiry_hours),
            blacklist: DashMap::new(),
        }
    }

    /// Sign a token for `subject` valid for the configured window.
    pub fn issue(&self, subject: &str, permissions: Vec<String>) -> Result<IssuedToken, TokenError> {
        self.issue_with_validity(subject, permissions, self.validity)
    }

    pub fn issue_with_validity(
        &self,
        subject: &str,
        permissions: Vec<String>,
        validity: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + validity;

        let claims = Claims {
            sub: subject.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            permissions,
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        tracing::debug!(subject = %subject, expires_at = %expires_at, "Session token issued");

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
        })
    }

    /// Signature, expiry, token type, then blacklist.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Invalid("empty token".to_string()));
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(TokenError::Invalid(format!(
                "unexpected token type '{}'",
                claims.token_type
            )));
        }

        if self.blacklist.contains_key(token) {
            return Err(TokenError::Revoked);
        }

        Ok(claims)
    }

    /// Blacklist a token until its natural expiry. Effective for every later `validate`.
    pub fn revoke(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        let mut validation = self.validation.clone();
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        self.blacklist.insert(token.to_string(), claims.exp);

        tracing::info!(subject = %claims.sub, jti = %claims.jti, "Session token revoked");

        Ok(claims.expires_at())
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.blacklist.contains_key(token)
    }

    /// Drop blacklist entries for tokens that can no longer validate anyway.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp();
        let before = self.blacklist.len();
        self.blacklist.retain(|_, exp| *exp > cutoff);
        before.saturating_sub(self.blacklist.len())
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }
}
