use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Shortest HS256 signing secret accepted at startup
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Token validity window in hours
    #[serde(default = "default_token_expiry_hours")]
    pub expiry_hours: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Shared key for service-to-service routes (event publishing, account provisioning)
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Maximum number of simultaneous connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Heartbeat interval advertised to clients in the `connected` event (seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// How long the read loop waits for an inbound frame before sending a heartbeat (seconds)
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout: u64,
    /// Connections silent for longer than this are evicted by the reaper (seconds)
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: u64,
    /// Bounded per-connection outbound queue; overflow disconnects the client
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    /// Login attempts allowed per account inside one window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_window")]
    pub attempt_window_seconds: u64,
    /// Consecutive failures before the account is locked
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration_seconds: u64,
    #[serde(default = "default_min_secret_length")]
    pub min_secret_length: usize,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests allowed per window, per client key
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Bucket capacity
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Buckets unused for this long are dropped by the reaper
    #[serde(default = "default_bucket_ttl")]
    pub bucket_ttl_seconds: u64,
    /// Derive the client key from X-Forwarded-For / X-Real-IP
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// Interval of the auth/rate-limit maintenance sweep (seconds)
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,
    /// Interval of the zombie connection sweep (seconds)
    #[serde(default = "default_connection_sweep_interval")]
    pub connection_sweep_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_token_expiry_hours() -> i64 {
    24
}

fn default_max_connections() -> usize {
    100
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_receive_timeout() -> u64 {
    15
}

fn default_stale_threshold() -> u64 {
    120 // 2 minutes
}

fn default_outbound_queue_size() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    5
}

fn default_attempt_window() -> u64 {
    300 // 5 minutes
}

fn default_lockout_threshold() -> u32 {
    5
}

fn default_lockout_duration() -> u64 {
    900 // 15 minutes
}

fn default_min_secret_length() -> usize {
    4
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_true() -> bool {
    true
}

fn default_requests_per_window() -> u32 {
    60
}

fn default_window_seconds() -> u64 {
    60
}

fn default_burst_size() -> u32 {
    10
}

fn default_bucket_ttl() -> u64 {
    600 // 10 minutes
}

fn default_maintenance_interval() -> u64 {
    86_400 // daily
}

fn default_connection_sweep_interval() -> u64 {
    60
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "moderation-realtime".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // MODRT_JWT__SECRET, MODRT_WEBSOCKET__MAX_CONNECTIONS, ...
            .add_source(
                Environment::with_prefix("MODRT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    /// Defaults everywhere except the signing secret.
    pub fn with_jwt_secret(secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            jwt: JwtConfig {
                secret: secret.into(),
                issuer: None,
                audience: None,
                expiry_hours: default_token_expiry_hours(),
            },
            api: ApiConfig::default(),
            websocket: WebSocketConfig::default(),
            login: LoginConfig::default(),
            rate_limit: RateLimitConfig::default(),
            reaper: ReaperConfig::default(),
            otel: OtelConfig::default(),
        }
    }

    /// Reject settings the service must not start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = self.jwt.secret.trim();
        if secret.is_empty() {
            return Err(ConfigError::Message(
                "jwt.secret must be set (MODRT_JWT__SECRET)".to_string(),
            ));
        }
        if secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "jwt.secret must be at least {} characters",
                MIN_JWT_SECRET_LENGTH
            )));
        }
        if self.websocket.outbound_queue_size == 0 {
            return Err(ConfigError::Message(
                "websocket.outbound_queue_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval.max(1))
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold)
    }
}

impl LoginConfig {
    pub fn attempt_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.attempt_window_seconds as i64)
    }

    pub fn lockout_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lockout_duration_seconds as i64)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            heartbeat_interval: default_heartbeat_interval(),
            receive_timeout: default_receive_timeout(),
            stale_threshold: default_stale_threshold(),
            outbound_queue_size: default_outbound_queue_size(),
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_window_seconds: default_attempt_window(),
            lockout_threshold: default_lockout_threshold(),
            lockout_duration_seconds: default_lockout_duration(),
            min_secret_length: default_min_secret_length(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
            burst_size: default_burst_size(),
            bucket_ttl_seconds: default_bucket_ttl(),
            trust_forwarded_headers: false,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: default_maintenance_interval(),
            connection_sweep_interval: default_connection_sweep_interval(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);

        let ws = WebSocketConfig::default();
        assert_eq!(ws.max_connections, 100);
        assert_eq!(ws.receive_timeout(), Duration::from_secs(15));
        assert_eq!(ws.stale_threshold(), Duration::from_secs(120));
    }

    #[test]
    fn test_login_defaults() {
        let login = LoginConfig::default();
        assert_eq!(login.max_attempts, 5);
        assert_eq!(login.lockout_threshold, 5);
        assert_eq!(login.attempt_window(), chrono::Duration::minutes(5));
        assert_eq!(login.lockout_duration(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_deserialize_partial_settings() {
        let settings: Settings = Config::builder()
            .set_override("jwt.secret", "s3cret")
            .unwrap()
            .set_override("websocket.max_connections", 7)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.jwt.secret, "s3cret");
        assert_eq!(settings.jwt.expiry_hours, 24);
        assert_eq!(settings.websocket.max_connections, 7);
        assert_eq!(settings.websocket.outbound_queue_size, 64);
        assert!(settings.rate_limit.enabled);
        assert_eq!(settings.reaper.maintenance_interval, 86_400);
    }

    #[test]
    fn test_validate_rejects_weak_jwt_secret() {
        assert!(Settings::with_jwt_secret("").validate().is_err());
        assert!(Settings::with_jwt_secret("   ").validate().is_err());
        assert!(Settings::with_jwt_secret("s3cret").validate().is_err());

        let strong = "x".repeat(MIN_JWT_SECRET_LENGTH);
        assert!(Settings::with_jwt_secret(strong.clone()).validate().is_ok());

        let mut settings = Settings::with_jwt_secret(strong);
        settings.websocket.outbound_queue_size = 0;
        assert!(settings.validate().is_err());
    }
}
