use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token type embedded in every session token issued by this service
pub const TOKEN_TYPE_ACCESS: &str = "access";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Capabilities granted at issuance, in order
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(rename = "type", default = "default_token_type")]
    pub token_type: String,
    /// Unique token ID
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

fn default_token_type() -> String {
    TOKEN_TYPE_ACCESS.to_string()
}

impl Claims {
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or_else(Utc::now)
    }

    pub fn is_expired(&self) -> bool {
        self.exp <= Utc::now().timestamp()
    }
}
