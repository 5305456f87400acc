mod app;
pub mod middleware;
mod state;

pub use app::create_app;
pub use middleware::{api_key_auth, extract_bearer_token, AuthSession};
pub use state::AppState;
