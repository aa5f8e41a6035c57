//! Session persistence
//!
//! Session snapshots go to an external key-value store with get/put/expire
//! semantics. [`MemorySessionStore`] is the in-process implementation.

use super::types::SessionState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session store unavailable: {0}")]
    Backend(String),
}

/// Key-value store for session snapshots
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a live record
    async fn get(&self, session_id: Uuid) -> Result<Option<SessionState>, StoreError>;

    /// Insert or replace a record that expires after `ttl`
    async fn put(&self, state: &SessionState, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a record
    async fn expire(&self, session_id: Uuid) -> Result<(), StoreError>;
}

/// In-memory store holding JSON-encoded records
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<Uuid, (String, Instant)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included until next access
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: Uuid) -> Result<Option<SessionState>, StoreError> {
        let encoded = {
            let mut records = self.records.lock();
            match records.get(&session_id) {
                Some((_, expires_at)) if *expires_at <= Instant::now() => {
                    records.remove(&session_id);
                    None
                }
                Some((encoded, _)) => Some(encoded.clone()),
                None => None,
            }
        };

        match encoded {
            Some(encoded) => Ok(Some(serde_json::from_str(&encoded)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, state: &SessionState, ttl: Duration) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(state)?;
        self.records
            .lock()
            .insert(state.session_id, (encoded, Instant::now() + ttl));
        Ok(())
    }

    async fn expire(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.records.lock().remove(&session_id);
        Ok(())
    }
}
