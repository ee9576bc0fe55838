//! Persistent token store backed by redb.
//!
//! # Table design
//!
//! A single `TOKENS` table keyed by the identifier string, value is the
//! JSON-encoded [`TokenState`]. Key order is id order, so listings come back
//! sorted without post-processing.
//!
//! redb calls are blocking; the [`TokenStore`] impl runs them on the blocking
//! pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{PulseError, Result};
use crate::store::TokenStore;
use crate::types::TokenState;

// ---------------------------------------------------------------------------
// Table definition
// ---------------------------------------------------------------------------

/// Key: token identifier
/// Value: JSON-encoded TokenState
const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

fn db_err(e: impl std::fmt::Display) -> PulseError {
    PulseError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// TokenDb
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TokenDb {
    db: Arc<Database>,
}

impl TokenDb {
    /// Open or create the database at `path`, creating parent directories
    /// and the `TOKENS` table as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(TOKENS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn load(&self, id: &str) -> Result<Option<TokenState>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TOKENS).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, state: &TokenState) -> Result<()> {
        let value = serde_json::to_vec(state)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(TOKENS).map_err(db_err)?;
            table
                .insert(state.id.as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Delete a record outright. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let existed = {
            let mut table = wt.open_table(TOKENS).map_err(db_err)?;
            let removed = table.remove(id).map_err(db_err)?;
            removed.is_some()
        };
        wt.commit().map_err(db_err)?;
        Ok(existed)
    }

    /// All records in id order, optionally only the active ones.
    pub fn scan(&self, active_only: bool) -> Result<Vec<TokenState>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TOKENS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let state: TokenState = serde_json::from_slice(v.value())?;
            if !active_only || state.active {
                out.push(state);
            }
        }
        Ok(out)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(TokenDb) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(db_err)?
    }
}

#[async_trait]
impl TokenStore for TokenDb {
    async fn get(&self, id: &str) -> Result<Option<TokenState>> {
        let id = id.to_string();
        self.blocking(move |db| db.load(&id)).await
    }

    async fn set(&self, state: &TokenState) -> Result<()> {
        let state = state.clone();
        self.blocking(move |db| db.save(&state)).await
    }

    async fn list_active(&self) -> Result<Vec<TokenState>> {
        self.blocking(|db| db.scan(true)).await
    }

    async fn list_all(&self) -> Result<Vec<TokenState>> {
        self.blocking(|db| db.scan(false)).await
    }
}
