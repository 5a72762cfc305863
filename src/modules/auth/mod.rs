pub mod cognito;
pub mod error;
pub mod jwt;
pub mod provider;
pub mod service;
pub mod tokens;

// Re-export the main types and functions
pub use cognito::CognitoClient;
pub use error::{AuthError, AuthResult};
pub use provider::{
    AuthFlow, AuthenticationResult, CodeDeliveryDetails, IdentityProvider, ProviderError,
    SignUpOutput,
};
pub use service::{AuthResponse, AuthService, UserInfo};
pub use tokens::{TokenRecord, TokenStore};
