pub mod code;
pub mod dynamo;
pub mod flow;
pub mod sigv4;
pub mod store;
pub mod types;

use thiserror::Error;

use crate::modules::auth::provider::ProviderError;

pub use code::generate_code;
pub use dynamo::DynamoHandoffStore;
pub use flow::HandoffFlow;
pub use store::HandoffStore;
pub use types::{AuthorizationCode, HandoffGrant, OAuth2Session};

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Session ID is required")]
    MissingSessionId,
    #[error("Sign-in tokens are required to complete desktop sign-in")]
    MissingTokens,
    #[error("Invalid or expired session. Please try again from your desktop app.")]
    SessionNotFound,
    #[error("Session has expired. Please try again from your desktop app.")]
    SessionExpired,
    #[error("Failed to obtain temporary credentials: {0}")]
    Credentials(String),
    #[error("Malformed record: {0}")]
    InvalidItem(String),
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirect(#[from] url::ParseError),
    #[error(transparent)]
    Remote(#[from] ProviderError),
}
