//! Per-session serialization and an in-memory history store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use quiver_core::{HistoryStore, Result, Turn};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// One async mutex per active session.
///
/// The map only holds weak references; a session's lock is dropped with its
/// last guard and pruned on the next acquisition.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `session_id`.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = lock(&self.locks);
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(session_id).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let created = Arc::new(AsyncMutex::new(()));
                    locks.insert(session_id.to_string(), Arc::downgrade(&created));
                    created
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Sessions currently holding or waiting for their lock.
    pub fn active(&self) -> usize {
        lock(&self.locks)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// Process-local history, lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    sessions: Mutex<HashMap<String, Vec<Turn>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn recent(&self, session_id: &str, n: usize) -> Result<Vec<Turn>> {
        let sessions = lock(&self.sessions);
        let turns = sessions.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(turns[turns.len().saturating_sub(n)..].to_vec())
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<()> {
        lock(&self.sessions)
            .entry(session_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }
}
