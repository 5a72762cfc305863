use super::types::{AuthorizationCode, OAuth2Session};
use super::HandoffError;

/// Managed data store holding pending desktop sessions and minted codes.
/// Calls are scoped by credentials derived from the caller's ID token.
pub trait HandoffStore: Send + Sync {
    fn get_session(
        &self,
        session_id: &str,
        id_token: &str,
    ) -> Result<Option<OAuth2Session>, HandoffError>;

    fn put_code(&self, code: &AuthorizationCode, id_token: &str) -> Result<(), HandoffError>;
}
