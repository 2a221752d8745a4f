//! SQLite persistence for the catalog. A single writer connection behind a
//! mutex, accessed from async code via `spawn_blocking`; multi-step writes
//! run as closures over one open transaction so a document ingests
//! atomically. The same mutex is what serializes concurrent price-history
//! updates for a `(product, vendor)` pair.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::task::spawn_blocking;

use pricebot_core::{Error, Result};

mod artifact;
mod map;
mod schema;

pub mod documents;
pub mod history;
pub mod jobs;
pub mod offers;
pub mod products;
pub mod vendors;
pub mod whatsapp;

pub use artifact::ArtifactStore;
pub use map::{decode_embedding, encode_embedding};
pub use offers::OfferFilter;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::storage)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::storage)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Error::storage)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(Error::storage)?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(Error::storage)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `func` against the connection on the blocking pool. `func` may
    /// open a transaction; everything it does is serialized with every other
    /// caller.
    pub async fn with_conn<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            func(&mut guard)
        })
        .await
        .map_err(Error::storage)?
    }

    /// Synchronous access for callers already off the async runtime (the job
    /// runner's ingest step, tests).
    pub fn with_conn_sync<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        func(&mut guard)
    }
}
