// First, declare the modules folder itself
mod modules;

// Re-export everything from modules for easier access
pub use modules::{auth, config, handoff, session, storage, utils};

// Re-export commonly used types
pub use modules::auth::service::{AuthResponse, AuthService};
pub use modules::auth::tokens::{TokenRecord, TokenStore};
pub use modules::config::AppConfig;
pub use modules::handoff::flow::HandoffFlow;
pub use modules::session::manager::SessionManager;

// Constants
pub const APP_NAME: &str = "fount-auth";
/// Storage key of the persisted token record
pub const TOKENS_KEY: &str = "cognitoTokens";
/// Tokens count as expired this long before `expiresAt`, and auto refresh fires this early
pub const EXPIRY_BUFFER_MS: u64 = 5 * 60 * 1000;
/// Lifetime the provider is assumed to grant when it omits `ExpiresIn`
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
/// Lifetime of a minted authorization code
pub const AUTH_CODE_TTL_SECS: u64 = 5 * 60;
pub const HTTP_TIMEOUT_SECS: u64 = 10;

// Type aliases
pub type HmacSha256 = hmac::Hmac<sha2::Sha256>;
