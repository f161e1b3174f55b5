//! Async facade over the SQLite store.
//!
//! Every read or write a handler performs runs as one closure inside one
//! IMMEDIATE transaction on the blocking pool. If the awaiting future is
//! dropped (handler timeout, session cancelled) before the closure commits,
//! the transaction is rolled back instead.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use eko_shared::{Id, IdGenerator};
use eko_store::{Database, StoreError, Tx};

use crate::error::ServerError;

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
    ids: Arc<IdGenerator>,
}

impl Store {
    pub fn open(path: &Path, node: u16) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_at(path)?, node))
    }

    pub fn in_memory(node: u16) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?, node))
    }

    fn new(db: Database, node: u16) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            ids: Arc::new(IdGenerator::new(node)),
        }
    }

    pub fn next_id(&self) -> Id {
        self.ids.generate()
    }

    /// Run `f` in a transaction. `Ok` commits, `Err` rolls back.
    pub async fn transact<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Tx<'_>) -> Result<T, ServerError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let guard = AbandonGuard::new();
        let abandoned = Arc::clone(&guard.flag);

        let result = tokio::task::spawn_blocking(move || {
            if abandoned.load(Ordering::Acquire) {
                return Err(ServerError::Timeout);
            }
            let mut db = db.lock().unwrap_or_else(PoisonError::into_inner);
            db.transaction(|tx| {
                let value = f(tx)?;
                if abandoned.load(Ordering::Acquire) {
                    return Err(ServerError::Timeout);
                }
                Ok(value)
            })
        })
        .await
        .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?;

        guard.disarm();
        result
    }
}

/// Flags the blocking closure as abandoned when the awaiting future is
/// dropped before completion.
struct AbandonGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl AbandonGuard {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::Release);
        }
    }
}
