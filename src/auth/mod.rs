mod claims;
mod credentials;
mod login_guard;
mod token;

pub use claims::{Claims, TOKEN_TYPE_ACCESS};
pub use credentials::{AccountRecord, CredentialError, CredentialStore, MemoryCredentialStore};
pub use login_guard::{FailedLoginTracker, LoginAttemptWindow, LoginError, LoginGuard};
pub use token::{IssuedToken, TokenError, TokenService};
