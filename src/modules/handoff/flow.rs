use std::sync::Arc;

use super::code::generate_code;
use super::store::HandoffStore;
use super::types::{AuthorizationCode, HandoffGrant, OAuth2Session};
use super::HandoffError;
use crate::modules::auth::tokens::TokenRecord;
use crate::modules::utils::logging::log_handoff_event;
use crate::modules::utils::time::{Clock, SystemClock};

/// Hands a freshly signed-in web session over to a waiting desktop client
pub struct HandoffFlow {
    store: Arc<dyn HandoffStore>,
    clock: Arc<dyn Clock>,
}

impl HandoffFlow {
    pub fn new(store: Arc<dyn HandoffStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn HandoffStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Look up the pending session; it must exist and not be past `expiresAt`
    pub fn validate_session(
        &self,
        session_id: &str,
        id_token: &str,
    ) -> Result<OAuth2Session, HandoffError> {
        if session_id.is_empty() {
            return Err(HandoffError::MissingSessionId);
        }

        let session = self
            .store
            .get_session(session_id, id_token)?
            .ok_or(HandoffError::SessionNotFound)?;

        if session.is_expired(self.clock.now_secs()) {
            return Err(HandoffError::SessionExpired);
        }
        Ok(session)
    }

    /// Persist a new unused code carrying the user's tokens
    pub fn store_code(
        &self,
        code: &str,
        session_id: &str,
        tokens: &TokenRecord,
    ) -> Result<AuthorizationCode, HandoffError> {
        let record = AuthorizationCode::new(code, session_id, tokens, self.clock.now_secs());
        self.store.put_code(&record, &tokens.id_token)?;
        Ok(record)
    }

    /// Validate the session, mint a code and store it. The grant carries the
    /// session's `state` and `redirectUri` for the redirect back to the desktop app.
    pub fn complete_flow(
        &self,
        session_id: &str,
        tokens: &TokenRecord,
    ) -> Result<HandoffGrant, HandoffError> {
        if !tokens.is_complete() {
            return Err(HandoffError::MissingTokens);
        }

        let session = match self.validate_session(session_id, &tokens.id_token) {
            Ok(session) => session,
            Err(e) => {
                log_handoff_event("validate_session", session_id, false, Some(&e.to_string()));
                return Err(e);
            }
        };

        let code = generate_code();
        if let Err(e) = self.store_code(&code, &session.session_id, tokens) {
            log_handoff_event("store_code", session_id, false, Some(&e.to_string()));
            return Err(e);
        }
        log_handoff_event("complete_flow", session_id, true, None);

        Ok(HandoffGrant {
            code,
            state: session.state,
            redirect_uri: session.redirect_uri,
        })
    }
}
