use thiserror::Error;

use super::provider::ProviderError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No access token found. User must be signed in.")]
    NotSignedIn,
    #[error("No refresh token found")]
    NoRefreshToken,
    #[error("Authentication result not received")]
    MissingAuthenticationResult,
    /// Tokens were cleared while a refresh was in flight
    #[error("Session was signed out during token refresh")]
    SessionCleared,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl AuthError {
    /// Resolved locally without reaching the identity provider
    pub fn is_local(&self) -> bool {
        !matches!(self, AuthError::Provider(_))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
