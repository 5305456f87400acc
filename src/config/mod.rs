mod settings;

pub use settings::{
    ApiConfig, JwtConfig, LoginConfig, OtelConfig, RateLimitConfig, ReaperConfig, ServerConfig,
    Settings, WebSocketConfig, MIN_JWT_SECRET_LENGTH,
};
