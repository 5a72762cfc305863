use std::sync::Arc;

use log::{info, warn};

use super::scheduler::{RefreshHandle, RefreshScheduler, SessionState};
use crate::modules::auth::service::AuthService;

/// Decides on start-up whether stored tokens are usable and keeps them fresh
pub struct SessionManager {
    auth: Arc<AuthService>,
}

impl SessionManager {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    /// Restore the session on start-up: `false` means the user must sign in.
    /// Expired tokens get exactly one refresh attempt; if it fails they are
    /// cleared, unless newer tokens were written while it ran.
    pub fn restore_session(&self) -> bool {
        let tokens = self.auth.token_store();
        if !tokens.is_authenticated() {
            return false;
        }

        if tokens.are_expired() {
            info!("Tokens expired, attempting to refresh...");
            let generation = tokens.generation();
            return match self.auth.refresh_tokens_from(generation) {
                Ok(_) => {
                    info!("Session restored successfully with refreshed tokens");
                    true
                }
                Err(e) if tokens.clear_if_current(generation) => {
                    warn!("Failed to refresh tokens, clearing session: {}", e);
                    false
                }
                Err(e) => {
                    info!("Tokens changed during refresh ({}), keeping them", e);
                    tokens.is_authenticated()
                }
            };
        }

        info!("Session is valid");
        true
    }

    /// Check before an authenticated call; refreshes once if expired
    pub fn ensure_valid_session(&self) -> bool {
        let tokens = self.auth.token_store();
        if !tokens.is_authenticated() {
            return false;
        }
        if tokens.are_expired() {
            return self.auth.refresh_tokens().is_ok();
        }
        true
    }

    /// State as seen from the stored record alone
    pub fn state(&self) -> SessionState {
        let tokens = self.auth.token_store();
        if !tokens.is_authenticated() {
            SessionState::Unauthenticated
        } else if tokens.are_expired() {
            SessionState::ExpiringSoon
        } else {
            SessionState::Valid
        }
    }

    /// Cooperative scheduler for hosts that run their own event loop
    pub fn scheduler(&self) -> RefreshScheduler {
        RefreshScheduler::new(self.auth.clone())
    }

    /// Refresh automatically ahead of expiry on a background worker until
    /// the returned handle is cancelled or dropped
    pub fn setup_auto_token_refresh(&self) -> RefreshHandle {
        RefreshHandle::spawn(self.scheduler())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::provider::ProviderError;
    use crate::modules::auth::service::tests::{
        granted, interfering_setup, other_account, setup, stored, Interference, MockProvider, NOW,
    };

    #[test]
    fn test_restore_without_tokens_makes_no_call() {
        let (service, provider, _) = setup(MockProvider::default());
        let manager = SessionManager::new(Arc::new(service));

        assert!(!manager.restore_session());
        assert!(provider.calls().is_empty());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn test_restore_valid_session_makes_no_call() {
        let (service, provider, _) = setup(MockProvider::default());
        service.token_store().store(&stored(Some(NOW + 400_000)));
        let manager = SessionManager::new(Arc::new(service));

        assert!(manager.restore_session());
        assert!(provider.calls().is_empty());
        assert_eq!(manager.state(), SessionState::Valid);
    }

    #[test]
    fn test_restore_refreshes_expired_session_once() {
        let (service, provider, _) = setup(MockProvider::with_auth_results(vec![Ok(Some(
            granted("a2", "i2", None),
        ))]));
        service.token_store().store(&stored(Some(NOW + 200_000)));
        let manager = SessionManager::new(Arc::new(service));
        assert_eq!(manager.state(), SessionState::ExpiringSoon);

        assert!(manager.restore_session());
        assert_eq!(provider.calls(), vec!["initiate_auth:refresh"]);
        assert_eq!(manager.state(), SessionState::Valid);
    }

    #[test]
    fn test_restore_clears_on_refresh_failure() {
        let (service, provider, _) = setup(MockProvider::default());
        service.token_store().store(&stored(None));
        let manager = SessionManager::new(Arc::new(service));

        assert!(!manager.restore_session());
        assert_eq!(provider.calls().len(), 1);
        assert!(manager.auth().token_store().get().is_none());
    }

    #[test]
    fn test_restore_failure_keeps_session_signed_in_meanwhile() {
        let (service, tokens) = interfering_setup(
            vec![Err(ProviderError::Transport("network down".to_string()))],
            Interference::SignOutThenIn(other_account()),
        );
        tokens.store(&stored(Some(NOW - 1)));
        let manager = SessionManager::new(Arc::new(service));

        assert!(manager.restore_session());
        assert_eq!(tokens.get(), Some(other_account()));
    }

    #[test]
    fn test_ensure_valid_session() {
        let (service, provider, _) = setup(MockProvider::with_auth_results(vec![Ok(Some(
            granted("a2", "i2", None),
        ))]));
        let manager = SessionManager::new(Arc::new(service));
        assert!(!manager.ensure_valid_session());

        manager.auth().token_store().store(&stored(Some(NOW - 1)));
        assert!(manager.ensure_valid_session());
        assert!(manager.ensure_valid_session());
        assert_eq!(provider.calls().len(), 1);
    }

    #[test]
    fn test_ensure_valid_session_keeps_tokens_on_failure() {
        let (service, _, _) = setup(MockProvider::default());
        service.token_store().store(&stored(Some(NOW - 1)));
        let manager = SessionManager::new(Arc::new(service));

        assert!(!manager.ensure_valid_session());
        assert!(manager.auth().token_store().get().is_some());
    }
}
