use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with an error body
    #[error("{message}")]
    Service { kind: String, message: String },
    #[error("Request to identity provider failed: {0}")]
    Transport(String),
    #[error("Unexpected response from identity provider: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Short exception name, e.g. `NotAuthorizedException`
    pub fn kind(&self) -> Option<&str> {
        match self {
            ProviderError::Service { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// How a verification code reached the user
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CodeDeliveryDetails {
    pub destination: Option<String>,
    pub delivery_medium: Option<String>,
    pub attribute_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignUpOutput {
    pub user_sub: String,
    pub user_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_delivery_details: Option<CodeDeliveryDetails>,
}

/// Tokens granted by an authentication call; the provider may omit any of them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationResult {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum AuthFlow {
    UserPassword { username: String, password: String },
    RefreshToken { refresh_token: String },
}

/// Managed identity provider. Every call is a single request with no retries.
pub trait IdentityProvider: Send + Sync {
    fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutput, ProviderError>;

    fn confirm_sign_up(&self, email: &str, confirmation_code: &str) -> Result<(), ProviderError>;

    /// `Ok(None)` means the provider answered with a challenge instead of tokens
    fn initiate_auth(&self, flow: AuthFlow) -> Result<Option<AuthenticationResult>, ProviderError>;

    fn forgot_password(&self, email: &str) -> Result<Option<CodeDeliveryDetails>, ProviderError>;

    fn confirm_forgot_password(
        &self,
        email: &str,
        confirmation_code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError>;

    fn change_password(
        &self,
        access_token: &str,
        previous_password: &str,
        proposed_password: &str,
    ) -> Result<(), ProviderError>;

    fn global_sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    fn delete_user(&self, access_token: &str) -> Result<(), ProviderError>;
}
