use std::fmt::Display;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthResult};
use super::jwt;
use super::provider::{AuthFlow, CodeDeliveryDetails, IdentityProvider, SignUpOutput};
use super::tokens::{TokenRecord, TokenStore};
use crate::modules::utils::logging::log_auth_event;
use crate::DEFAULT_EXPIRES_IN_SECS;

/// Uniform `{success, data?, error?}` shape handed to the presentation layer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> AuthResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl<T, E: Display> From<Result<T, E>> for AuthResponse<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Identity of the signed-in user as read from the ID token
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub sub: String,
    pub email: Option<String>,
}

/// Identity operations over a provider, keeping the token store in sync
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    tokens: Arc<TokenStore>,
}

impl AuthService {
    pub fn new(provider: Arc<dyn IdentityProvider>, tokens: Arc<TokenStore>) -> Self {
        Self { provider, tokens }
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    fn expires_at(&self, expires_in: Option<u64>) -> u64 {
        let seconds = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        self.tokens
            .clock()
            .now_millis()
            .saturating_add(seconds.saturating_mul(1000))
    }

    pub fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutput> {
        let result = self.provider.sign_up(email, password);
        log_auth_event("sign_up", email, result.is_ok(), None);
        Ok(result?)
    }

    pub fn confirm_sign_up(&self, email: &str, confirmation_code: &str) -> AuthResult<()> {
        let result = self.provider.confirm_sign_up(email, confirmation_code);
        log_auth_event("confirm_sign_up", email, result.is_ok(), None);
        Ok(result?)
    }

    /// Password sign-in; persists the granted tokens
    pub fn sign_in(&self, email: &str, password: &str) -> AuthResult<TokenRecord> {
        let outcome = self
            .provider
            .initiate_auth(AuthFlow::UserPassword {
                username: email.to_string(),
                password: password.to_string(),
            })
            .map_err(AuthError::from)
            .and_then(|result| {
                let result = result.ok_or(AuthError::MissingAuthenticationResult)?;
                match (result.access_token, result.id_token, result.refresh_token) {
                    (Some(access_token), Some(id_token), Some(refresh_token)) => Ok(TokenRecord {
                        access_token,
                        id_token,
                        refresh_token,
                        expires_at: Some(self.expires_at(result.expires_in)),
                    }),
                    _ => Err(AuthError::MissingAuthenticationResult),
                }
            });

        match outcome {
            Ok(tokens) => {
                self.tokens.store(&tokens);
                log_auth_event("sign_in", email, true, None);
                Ok(tokens)
            }
            Err(e) => {
                log_auth_event("sign_in", email, false, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    /// Exchange the stored refresh token for new access and ID tokens.
    /// The refresh token itself is kept. Nothing is written if the store was
    /// written or cleared while the call was in flight.
    pub fn refresh_tokens(&self) -> AuthResult<TokenRecord> {
        self.refresh_tokens_from(self.tokens.generation())
    }

    /// `refresh_tokens` against a generation the caller already read, so it
    /// can guard its own failure handling with `TokenStore::clear_if_current`
    pub fn refresh_tokens_from(&self, generation: u64) -> AuthResult<TokenRecord> {
        let current = self
            .tokens
            .get()
            .filter(|t| !t.refresh_token.is_empty())
            .ok_or(AuthError::NoRefreshToken)?;

        let result = self
            .provider
            .initiate_auth(AuthFlow::RefreshToken {
                refresh_token: current.refresh_token.clone(),
            })
            .map_err(|e| {
                log_auth_event("refresh", "session", false, Some(&e.to_string()));
                e
            })?
            .ok_or(AuthError::MissingAuthenticationResult)?;

        let refreshed = TokenRecord {
            access_token: result.access_token.unwrap_or(current.access_token),
            id_token: result.id_token.unwrap_or(current.id_token),
            refresh_token: current.refresh_token,
            expires_at: Some(self.expires_at(result.expires_in)),
        };

        if !self.tokens.store_if_current(&refreshed, generation) {
            info!("Discarding refreshed tokens: session was cleared meanwhile");
            return Err(AuthError::SessionCleared);
        }
        log_auth_event("refresh", "session", true, None);
        Ok(refreshed)
    }

    pub fn forgot_password(&self, email: &str) -> AuthResult<Option<CodeDeliveryDetails>> {
        let result = self.provider.forgot_password(email);
        log_auth_event("forgot_password", email, result.is_ok(), None);
        Ok(result?)
    }

    pub fn confirm_forgot_password(
        &self,
        email: &str,
        confirmation_code: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let result = self
            .provider
            .confirm_forgot_password(email, confirmation_code, new_password);
        log_auth_event("confirm_forgot_password", email, result.is_ok(), None);
        Ok(result?)
    }

    pub fn change_password(&self, previous_password: &str, proposed_password: &str) -> AuthResult<()> {
        let access_token = self.tokens.access_token().ok_or(AuthError::NotSignedIn)?;
        let result = self
            .provider
            .change_password(&access_token, previous_password, proposed_password);
        log_auth_event("change_password", "session", result.is_ok(), None);
        Ok(result?)
    }

    /// Global sign-out. Local tokens are cleared whatever the provider says;
    /// a provider failure is still reported.
    pub fn sign_out(&self) -> AuthResult<()> {
        let remote = match self.tokens.access_token() {
            Some(access_token) => self.provider.global_sign_out(&access_token),
            None => Ok(()),
        };
        self.tokens.clear();

        match remote {
            Ok(()) => {
                log_auth_event("sign_out", "local", true, None);
                Ok(())
            }
            Err(e) => {
                log_auth_event("sign_out", "local", false, Some(&e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Delete the signed-in user. Local tokens are cleared in every case.
    pub fn delete_account(&self) -> AuthResult<()> {
        let Some(access_token) = self.tokens.access_token() else {
            self.tokens.clear();
            return Err(AuthError::NotSignedIn);
        };

        let remote = self.provider.delete_user(&access_token);
        self.tokens.clear();
        log_auth_event(
            "delete_account",
            "session",
            remote.is_ok(),
            remote.as_ref().err().map(|e| e.to_string()).as_deref(),
        );
        Ok(remote?)
    }

    /// Identity claims of the stored ID token, if any
    pub fn current_user(&self) -> Option<UserInfo> {
        let id_token = self.tokens.id_token()?;
        let claims = jwt::decode_jwt(&id_token)?;
        Some(UserInfo {
            sub: claims.sub,
            email: claims.email,
        })
    }
}
