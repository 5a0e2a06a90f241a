//! Opaque session tokens in the shared key-value store.
//!
//! A session maps `sessions:<token>` to the principal id with a TTL.
//! Token issuance/teardown lives here; everything else only calls
//! `lookup`.

use rand::RngCore;
use service_core::error::AppError;
use std::sync::Arc;

use crate::services::redis::CacheStore;

const SESSION_KEY_PREFIX: &str = "sessions:";

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn CacheStore>,
    ttl_secs: u64,
}

impl SessionStore {
    pub fn new(store: Arc<dyn CacheStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Create a session for a principal and return the 32-char hex token.
    pub async fn create(&self, principal_id: &str) -> Result<String, AppError> {
        let token = generate_token();
        self.store
            .set_ex(&session_key(&token), principal_id, self.ttl_secs)
            .await
            .map_err(AppError::StoreUnavailable)?;
        tracing::debug!(token_prefix = &token[..8], ttl = self.ttl_secs, "Created session");
        Ok(token)
    }

    /// Resolve a token to a principal id. `None` means unknown or expired.
    pub async fn lookup(&self, token: &str) -> Result<Option<String>, AppError> {
        self.store
            .get_raw(&session_key(token))
            .await
            .map_err(AppError::StoreUnavailable)
    }

    /// Delete a session. Deleting an unknown token is not an error.
    pub async fn destroy(&self, token: &str) -> Result<(), AppError> {
        self.store
            .delete(&session_key(token))
            .await
            .map_err(AppError::StoreUnavailable)?;
        tracing::debug!(token_prefix = &token[..token.len().min(8)], "Destroyed session");
        Ok(())
    }
}

fn session_key(token: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, token)
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
