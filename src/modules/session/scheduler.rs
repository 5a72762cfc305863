use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};
use serde::Serialize;

use crate::modules::auth::error::AuthError;
use crate::modules::auth::service::AuthService;
use crate::modules::utils::time::format_duration;
use crate::EXPIRY_BUFFER_MS;

/// Where a browser-style session stands in its refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Unauthenticated,
    Valid,
    ExpiringSoon,
    Refreshing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing scheduled
    Idle,
    Pending { due_in_ms: u64 },
    /// Refreshed and re-armed
    Refreshed,
    /// Refresh failed; tokens were cleared and nothing is scheduled
    Failed(String),
    /// Tokens were stored or cleared while the refresh was in flight; its
    /// result was dropped and the slot re-armed for whatever is stored now
    Superseded,
}

/// Single-slot, cooperative refresh timer.
///
/// The owner drives it by calling `poll`; a refresh runs to completion inside
/// `poll` before the next one is armed, so refreshes never overlap.
pub struct RefreshScheduler {
    auth: Arc<AuthService>,
    due_at: Option<u64>,
    state: SessionState,
}

impl RefreshScheduler {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self {
            auth,
            due_at: None,
            state: SessionState::Unauthenticated,
        }
    }

    /// `ExpiringSoon` once the slot is due but not yet polled
    pub fn state(&self) -> SessionState {
        match (self.state, self.due_at) {
            (SessionState::Valid, Some(due_at))
                if self.auth.token_store().clock().now_millis() >= due_at =>
            {
                SessionState::ExpiringSoon
            }
            (state, _) => state,
        }
    }

    pub fn due_at(&self) -> Option<u64> {
        self.due_at
    }

    /// Schedule the next refresh `EXPIRY_BUFFER_MS` ahead of expiry, or right
    /// away when the tokens are already past it. Idle when signed out.
    pub fn arm(&mut self) -> Option<u64> {
        let tokens = self.auth.token_store();
        if !tokens.is_authenticated() {
            self.due_at = None;
            self.state = SessionState::Unauthenticated;
            return None;
        }

        let delay = tokens.time_until_expiration().saturating_sub(EXPIRY_BUFFER_MS);
        info!("Scheduling token refresh in {}", format_duration(delay));

        let due_at = tokens.clock().now_millis() + delay;
        self.due_at = Some(due_at);
        self.state = SessionState::Valid;
        Some(due_at)
    }

    pub fn cancel(&mut self) {
        if self.due_at.take().is_some() {
            debug!("Pending token refresh cancelled");
        }
    }

    /// Fire the slot if it is due
    pub fn poll(&mut self) -> PollOutcome {
        let Some(due_at) = self.due_at else {
            return PollOutcome::Idle;
        };
        let now = self.auth.token_store().clock().now_millis();
        if now < due_at {
            return PollOutcome::Pending {
                due_in_ms: due_at - now,
            };
        }

        self.due_at = None;
        info!("Auto-refreshing tokens...");
        self.state = SessionState::Refreshing;

        let tokens = self.auth.token_store().clone();
        let generation = tokens.generation();
        match self.auth.refresh_tokens_from(generation) {
            Ok(_) => {
                info!("Tokens auto-refreshed successfully");
                self.arm();
                PollOutcome::Refreshed
            }
            Err(e) => {
                if !matches!(e, AuthError::SessionCleared) && tokens.clear_if_current(generation) {
                    error!("Auto-refresh failed: {}", e);
                    self.state = SessionState::Unauthenticated;
                    return PollOutcome::Failed(e.to_string());
                }
                info!("Tokens changed during refresh, rescheduling");
                self.arm();
                PollOutcome::Superseded
            }
        }
    }
}

/// Background runner for a `RefreshScheduler`. Cancelling or dropping the
/// handle wakes the worker, clears the pending slot and joins the thread.
pub struct RefreshHandle {
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub fn spawn(mut scheduler: RefreshScheduler) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        scheduler.arm();

        let worker = thread::Builder::new()
            .name("token-refresh".to_string())
            .spawn(move || {
                loop {
                    match scheduler.poll() {
                        PollOutcome::Idle | PollOutcome::Failed(_) => break,
                        PollOutcome::Refreshed | PollOutcome::Superseded => {
                            if cancelled.try_recv().is_ok() {
                                break;
                            }
                        }
                        PollOutcome::Pending { due_in_ms } => {
                            match cancelled.recv_timeout(Duration::from_millis(due_in_ms)) {
                                Err(RecvTimeoutError::Timeout) => continue,
                                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    }
                }
                scheduler.cancel();
                debug!("Token refresh worker stopped");
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to start token refresh worker: {}", e);
                None
            }
        };
        Self {
            cancel: Some(cancel),
            worker,
        }
    }

    /// True once the worker has nothing left to do
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Token refresh worker panicked");
            }
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::provider::ProviderError;
    use crate::modules::auth::service::tests::{
        granted, interfering_setup, other_account, setup, stored, Interference, MockProvider, NOW,
    };
    use std::time::Instant;

    #[test]
    fn test_unauthenticated_scheduler_is_idle() {
        let (service, provider, _) = setup(MockProvider::default());
        let mut scheduler = RefreshScheduler::new(Arc::new(service));

        assert_eq!(scheduler.arm(), None);
        assert_eq!(scheduler.poll(), PollOutcome::Idle);
        assert_eq!(scheduler.state(), SessionState::Unauthenticated);
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_arms_five_minutes_ahead_of_expiry() {
        let (service, provider, clock) = setup(MockProvider::with_auth_results(vec![Ok(Some(
            granted("a2", "i2", None),
        ))]));
        service.token_store().store(&stored(Some(NOW + 3_600_000)));
        let mut scheduler = RefreshScheduler::new(Arc::new(service));

        assert_eq!(scheduler.arm(), Some(NOW + 3_300_000));
        assert_eq!(scheduler.state(), SessionState::Valid);
        assert_eq!(
            scheduler.poll(),
            PollOutcome::Pending {
                due_in_ms: 3_300_000
            }
        );
        assert!(provider.calls().is_empty());

        clock.advance(3_300_000);
        assert_eq!(scheduler.state(), SessionState::ExpiringSoon);
        assert_eq!(scheduler.poll(), PollOutcome::Refreshed);
        assert_eq!(provider.calls(), vec!["initiate_auth:refresh"]);
        // New tokens live another hour, so the next slot is 55 minutes out
        assert_eq!(scheduler.due_at(), Some(NOW + 3_300_000 + 3_300_000));
        assert_eq!(scheduler.state(), SessionState::Valid);
    }

    #[test]
    fn test_expired_tokens_refresh_immediately() {
        let (service, provider, _) = setup(MockProvider::with_auth_results(vec![Ok(Some(
            granted("a2", "i2", None),
        ))]));
        service.token_store().store(&stored(Some(NOW - 1)));
        let mut scheduler = RefreshScheduler::new(Arc::new(service));

        assert_eq!(scheduler.arm(), Some(NOW));
        assert_eq!(scheduler.poll(), PollOutcome::Refreshed);
        assert_eq!(provider.calls().len(), 1);
    }

    #[test]
    fn test_failed_refresh_stops_and_signs_out() {
        let (service, provider, _) = setup(MockProvider::default());
        service.token_store().store(&stored(Some(NOW + 60_000)));
        let service = Arc::new(service);
        let mut scheduler = RefreshScheduler::new(service.clone());

        scheduler.arm();
        assert!(matches!(scheduler.poll(), PollOutcome::Failed(_)));
        assert_eq!(scheduler.state(), SessionState::Unauthenticated);
        assert!(service.token_store().get().is_none());

        // No further attempts
        assert_eq!(scheduler.poll(), PollOutcome::Idle);
        assert_eq!(provider.calls().len(), 1);
    }

    #[test]
    fn test_failed_refresh_keeps_session_signed_in_meanwhile() {
        let (service, tokens) = interfering_setup(
            vec![Err(ProviderError::Transport("network down".to_string()))],
            Interference::SignOutThenIn(other_account()),
        );
        tokens.store(&stored(Some(NOW - 1)));
        let mut scheduler = RefreshScheduler::new(Arc::new(service));

        assert_eq!(scheduler.arm(), Some(NOW));
        assert_eq!(scheduler.poll(), PollOutcome::Superseded);
        assert_eq!(tokens.get(), Some(other_account()));
        assert_eq!(scheduler.due_at(), Some(NOW + 3_300_000));
        assert_eq!(scheduler.state(), SessionState::Valid);
    }

    #[test]
    fn test_refresh_after_sign_out_goes_idle() {
        let (service, tokens) = interfering_setup(
            vec![Ok(Some(granted("a2", "i2", None)))],
            Interference::SignOut,
        );
        tokens.store(&stored(Some(NOW - 1)));
        let mut scheduler = RefreshScheduler::new(Arc::new(service));

        scheduler.arm();
        assert_eq!(scheduler.poll(), PollOutcome::Superseded);
        assert!(tokens.get().is_none());
        assert_eq!(scheduler.state(), SessionState::Unauthenticated);
        assert_eq!(scheduler.poll(), PollOutcome::Idle);
    }

    #[test]
    fn test_cancel_clears_slot() {
        let (service, provider, clock) = setup(MockProvider::default());
        service.token_store().store(&stored(Some(NOW + 3_600_000)));
        let mut scheduler = RefreshScheduler::new(Arc::new(service));

        scheduler.arm();
        scheduler.cancel();
        clock.advance(4_000_000);
        assert_eq!(scheduler.poll(), PollOutcome::Idle);
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_handle_cancel_stops_pending_worker() {
        let (service, provider, _) = setup(MockProvider::default());
        service.token_store().store(&stored(Some(NOW + 3_600_000)));

        let handle = RefreshHandle::spawn(RefreshScheduler::new(Arc::new(service)));
        assert!(!handle.is_finished());

        let started = Instant::now();
        handle.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_handle_worker_exits_after_failure() {
        let (service, provider, _) = setup(MockProvider::default());
        service.token_store().store(&stored(Some(NOW - 1)));
        let service = Arc::new(service);

        let handle = RefreshHandle::spawn(RefreshScheduler::new(service.clone()));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert!(handle.is_finished());
        assert_eq!(provider.calls(), vec!["initiate_auth:refresh"]);
        assert!(service.token_store().get().is_none());
    }
}
