//! Token Store collaborator.
//!
//! The monitor loop reads and writes per-token state through [`TokenStore`]
//! and assumes nothing beyond last-write-wins per identifier.
//! [`MemoryTokenStore`] keeps everything in process memory; the persistent
//! implementation is [`crate::token_db::TokenDb`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{PulseError, Result};
use crate::types::{validate_identifier, TokenState};

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<TokenState>>;

    /// Insert or overwrite the record for `state.id`.
    async fn set(&self, state: &TokenState) -> Result<()>;

    /// Every record with `active == true`, ordered by id.
    async fn list_active(&self) -> Result<Vec<TokenState>>;

    /// Every record, active or not, ordered by id.
    async fn list_all(&self) -> Result<Vec<TokenState>>;

    /// Stop tracking `id` while keeping its history.
    async fn deactivate(&self, id: &str) -> Result<TokenState> {
        let mut state = self
            .get(id)
            .await?
            .ok_or_else(|| PulseError::TokenNotFound(id.to_string()))?;
        state.active = false;
        self.set(&state).await?;
        Ok(state)
    }
}

/// Start (or resume) tracking `id`. An existing record keeps its history and
/// is reactivated; `symbol` only fills a missing one.
pub async fn track_token(
    store: &dyn TokenStore,
    id: &str,
    symbol: Option<String>,
    now: DateTime<Utc>,
) -> Result<TokenState> {
    validate_identifier(id)?;
    let mut state = match store.get(id).await? {
        Some(existing) => existing,
        None => TokenState::new(id, now),
    };
    state.active = true;
    if state.symbol.is_none() {
        state.symbol = symbol;
    }
    state.updated_at = now;
    store.set(&state).await?;
    Ok(state)
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, TokenState>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: impl IntoIterator<Item = TokenState>) -> Self {
        Self {
            tokens: RwLock::new(tokens.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }

    fn sorted(&self, active_only: bool) -> Result<Vec<TokenState>> {
        let tokens = self.tokens.read().map_err(|e| PulseError::Store(e.to_string()))?;
        let mut out: Vec<TokenState> = tokens
            .values()
            .filter(|t| !active_only || t.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, id: &str) -> Result<Option<TokenState>> {
        let tokens = self.tokens.read().map_err(|e| PulseError::Store(e.to_string()))?;
        Ok(tokens.get(id).cloned())
    }

    async fn set(&self, state: &TokenState) -> Result<()> {
        let mut tokens = self.tokens.write().map_err(|e| PulseError::Store(e.to_string()))?;
        tokens.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<TokenState>> {
        self.sorted(true)
    }

    async fn list_all(&self) -> Result<Vec<TokenState>> {
        self.sorted(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "So11111111111111111111111111111111111111112";

    #[tokio::test]
    async fn track_validates_and_reactivates() {
        let store = MemoryTokenStore::new();
        let now = Utc::now();
        assert!(matches!(
            track_token(&store, "nope", None, now).await,
            Err(PulseError::InvalidIdentifier(_))
        ));

        let t = track_token(&store, MINT, Some("SOL".into()), now).await.unwrap();
        assert!(t.active);
        store.deactivate(MINT).await.unwrap();

        let t = track_token(&store, MINT, Some("OTHER".into()), now).await.unwrap();
        assert!(t.active);
        assert_eq!(t.symbol.as_deref(), Some("SOL"));
        assert_eq!(store.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_get_and_list() {
        let store = MemoryTokenStore::new();
        let now = Utc::now();
        store.set(&TokenState::new("b", now)).await.unwrap();
        store.set(&TokenState::new("a", now)).await.unwrap();

        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("zzz").await.unwrap().is_none());
        let ids: Vec<String> = store
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let now = Utc::now();
        let store = MemoryTokenStore::with_tokens([TokenState::new("a", now)]);
        let mut t = TokenState::new("a", now);
        t.alert_watermark = 4;
        store.set(&t).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().alert_watermark, 4);
    }

    #[tokio::test]
    async fn deactivate_hides_from_active_list() {
        let now = Utc::now();
        let store = MemoryTokenStore::with_tokens([TokenState::new("a", now), TokenState::new("b", now)]);
        let t = store.deactivate("a").await.unwrap();
        assert!(!t.active);
        assert_eq!(store.list_active().await.unwrap().len(), 1);
        assert_eq!(store.list_all().await.unwrap().len(), 2);

        let err = store.deactivate("missing").await.unwrap_err();
        assert!(matches!(err, PulseError::TokenNotFound(_)));
    }
}
