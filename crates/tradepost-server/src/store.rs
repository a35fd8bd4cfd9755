//! Async access to the SQLite [`Database`].
//!
//! The connection lives behind a `std::sync::Mutex`; every call runs on the
//! blocking pool so request and socket tasks never block the runtime.

use std::sync::{Arc, Mutex};

use tradepost_store::{Database, StoreError};

use crate::error::ServerError;

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|_| ServerError::Internal("Lock poisoned".into()))?;
            f(&db).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Storage task failed: {e}")))?
    }
}
