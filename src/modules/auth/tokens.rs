use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::modules::storage::{KeyValueStore, StorageError};
use crate::modules::utils::time::{Clock, SystemClock};
use crate::{EXPIRY_BUFFER_MS, TOKENS_KEY};

/// Access, ID and refresh tokens plus the access token's expiry in epoch milliseconds
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl TokenRecord {
    /// True when all three tokens are present
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.id_token.is_empty() && !self.refresh_token.is_empty()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Persists the single token record through a key-value backend.
///
/// Storage failures never reach callers: they are logged and the record is
/// treated as absent. Every `store` and `clear` bumps a generation counter so
/// that a refresh started before either can be told apart and dropped.
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    generation: Mutex<u64>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            generation: Mutex::new(0),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, tokens: &TokenRecord) {
        let result = serde_json::to_string(tokens)
            .map_err(StorageError::from)
            .and_then(|json| self.backend.set(TOKENS_KEY, &json));
        if let Err(e) = result {
            error!("Failed to store tokens: {}", e);
        }
    }

    /// Overwrite the persisted record and invalidate any in-flight refresh
    pub fn store(&self, tokens: &TokenRecord) {
        let mut guard = self.lock_generation();
        *guard += 1;
        self.write(tokens);
    }

    /// Overwrite the persisted record unless `store` or `clear` ran since
    /// `generation` was read. Returns whether the write happened. A successful
    /// write keeps the generation, so the writer's own record stays current.
    pub fn store_if_current(&self, tokens: &TokenRecord, generation: u64) -> bool {
        let guard = self.lock_generation();
        if *guard != generation {
            debug!(
                "Dropping token write from generation {} (current {})",
                generation, *guard
            );
            return false;
        }
        self.write(tokens);
        true
    }

    pub fn get(&self) -> Option<TokenRecord> {
        let raw = match self.backend.get(TOKENS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!("Failed to retrieve tokens: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                error!("Failed to parse stored tokens: {}", e);
                None
            }
        }
    }

    /// Remove the record and invalidate any in-flight refresh
    pub fn clear(&self) {
        let mut guard = self.lock_generation();
        *guard += 1;
        self.remove();
    }

    /// Remove the record only if nothing was stored or cleared since
    /// `generation` was read. Returns whether the record was removed.
    pub fn clear_if_current(&self, generation: u64) -> bool {
        let mut guard = self.lock_generation();
        if *guard != generation {
            debug!(
                "Keeping tokens written after generation {} (current {})",
                generation, *guard
            );
            return false;
        }
        *guard += 1;
        self.remove();
        true
    }

    fn remove(&self) {
        if let Err(e) = self.backend.remove(TOKENS_KEY) {
            error!("Failed to clear tokens: {}", e);
        }
    }

    pub fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().and_then(|t| non_empty(&t.access_token))
    }

    pub fn id_token(&self) -> Option<String> {
        self.get().and_then(|t| non_empty(&t.id_token))
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get().and_then(|t| non_empty(&t.refresh_token))
    }

    /// True when there is no record, no expiry, or less than the buffer remains
    pub fn are_expired(&self) -> bool {
        match self.get().and_then(|t| t.expires_at) {
            Some(expires_at) => {
                self.clock.now_millis() >= expires_at.saturating_sub(EXPIRY_BUFFER_MS)
            }
            None => true,
        }
    }

    /// Milliseconds until `expiresAt`, 0 when unknown or already past
    pub fn time_until_expiration(&self) -> u64 {
        match self.get().and_then(|t| t.expires_at) {
            Some(expires_at) => expires_at.saturating_sub(self.clock.now_millis()),
            None => 0,
        }
    }
}
