//! Batch fetch client.
//!
//! Turns "give me market data for these identifiers" into as few upstream
//! requests as possible:
//!
//! ```text
//! ids ──► dedupe ──► shared TtlCache ──hit──────────────────────────┐
//!                        │ miss                                      │
//!                        ▼                                           │
//!              single-flight claim ──owned by another caller──► wait ┤
//!                        │ claimed                                   │
//!                        ▼                                           │
//!              chunks of ≤ max_chunk ──► DataSource (retry/backoff)  │
//!                        │                                           │
//!                        ▼                                           ▼
//!              best pair per id ──► cache fill ──────────────► full map
//! ```
//!
//! The returned map always has one entry per distinct requested identifier.
//! `None` means "no data": either upstream listed no pair for it, or its
//! chunk failed after every retry. Only the first case is cached.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::cache::{CacheStats, LruLayer, TtlCache};
use crate::config::{CacheConfig, FetchConfig, MAX_UPSTREAM_CHUNK};
use crate::error::{FetchError, PulseError, Result};
use crate::source::{DataSource, PairData};
use crate::types::MarketRecord;

/// Process-wide cache of per-identifier fetch results.
pub type SharedCache = TtlCache<Option<MarketRecord>>;

type InflightMap = Mutex<HashMap<String, watch::Receiver<()>>>;

pub fn cache_key(id: &str) -> String {
    format!("batch:{id}")
}

pub struct BatchFetchClient {
    source: Arc<dyn DataSource>,
    cache: Arc<SharedCache>,
    lru: LruLayer<String, MarketRecord>,
    config: FetchConfig,
    inflight: InflightMap,
}

impl BatchFetchClient {
    pub fn new(
        source: Arc<dyn DataSource>,
        cache: Arc<SharedCache>,
        cache_config: &CacheConfig,
        config: FetchConfig,
    ) -> Result<Self> {
        if !(1..=MAX_UPSTREAM_CHUNK).contains(&config.max_chunk) {
            return Err(PulseError::InvalidConfig(format!(
                "max_chunk must be between 1 and {MAX_UPSTREAM_CHUNK}, got {}",
                config.max_chunk
            )));
        }
        if config.max_attempts == 0 {
            return Err(PulseError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            source,
            lru: LruLayer::new(cache_config.lru_capacity, cache.ttl()),
            cache,
            config,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // -----------------------------------------------------------------------
    // Batch path
    // -----------------------------------------------------------------------

    pub async fn fetch_batch(&self, ids: &[String]) -> HashMap<String, Option<MarketRecord>> {
        let mut results = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return results;
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let mut misses = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match self.cache.get(&cache_key(id)) {
                Some(record) => {
                    results.insert(id.clone(), record);
                }
                None => misses.push(id.clone()),
            }
        }
        debug!(
            requested = seen.len(),
            cached = results.len(),
            misses = misses.len(),
            "batch fetch"
        );
        if misses.is_empty() {
            return results;
        }

        let (guard, waiting) = self.claim(misses);
        if !guard.ids.is_empty() {
            results.extend(self.fetch_uncached(&guard.ids).await);
        }
        drop(guard);

        for (id, mut done) in waiting {
            // Err means the owning caller finished (its sender is gone).
            let _ = done.changed().await;
            let record = self.cache.get(&cache_key(&id)).flatten();
            results.insert(id, record);
        }
        results
    }

    /// Split `misses` into ids this caller will fetch and ids another caller
    /// is already fetching.
    fn claim(&self, misses: Vec<String>) -> (InflightGuard<'_>, Vec<(String, watch::Receiver<()>)>) {
        let (tx, rx) = watch::channel(());
        let mut owned = Vec::new();
        let mut waiting = Vec::new();
        {
            let mut inflight = lock(&self.inflight);
            for id in misses {
                match inflight.get(&id) {
                    Some(other) => waiting.push((id, other.clone())),
                    None => {
                        inflight.insert(id.clone(), rx.clone());
                        owned.push(id);
                    }
                }
            }
        }
        if !waiting.is_empty() {
            debug!(count = waiting.len(), "joining in-flight fetches");
        }
        let guard = InflightGuard {
            map: &self.inflight,
            ids: owned,
            _done: tx,
        };
        (guard, waiting)
    }

    async fn fetch_uncached(&self, ids: &[String]) -> HashMap<String, Option<MarketRecord>> {
        let mut results = HashMap::with_capacity(ids.len());
        for (index, chunk) in ids.chunks(self.config.max_chunk).enumerate() {
            if index > 0 && !self.config.inter_chunk_delay().is_zero() {
                tokio::time::sleep(self.config.inter_chunk_delay()).await;
            }
            match self.fetch_chunk(index, chunk).await {
                Some(pairs) => {
                    let mut best = select_best_pairs(chunk, &pairs, Utc::now());
                    for id in chunk {
                        let record = best.remove(id);
                        self.cache.set(cache_key(id), record.clone());
                        results.insert(id.clone(), record);
                    }
                }
                None => {
                    for id in chunk {
                        results.insert(id.clone(), None);
                    }
                }
            }
        }
        results
    }

    /// One chunk with retries. `None` once attempts are exhausted or the
    /// failure is permanent.
    async fn fetch_chunk(&self, index: usize, chunk: &[String]) -> Option<Vec<PairData>> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.source.fetch(chunk).await {
                Ok(pairs) => {
                    debug!(chunk = index, size = chunk.len(), pairs = pairs.len(), "chunk fetched");
                    return Some(pairs);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let wait = self.retry_delay(&e, attempt);
                    warn!(
                        chunk = index,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        source = self.source.name(),
                        error = %e,
                        "upstream request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    error!(
                        chunk = index,
                        attempt,
                        size = chunk.len(),
                        source = self.source.name(),
                        error = %e,
                        "chunk failed, marking identifiers as no data"
                    );
                    return None;
                }
            }
        }
        None
    }

    fn retry_delay(&self, err: &FetchError, attempt: u32) -> Duration {
        match err {
            FetchError::RateLimited { retry_after } => {
                retry_after.unwrap_or_else(|| self.config.default_retry_after())
            }
            _ => {
                let (min, max) = (self.config.backoff_min_ms, self.config.backoff_max_ms);
                let base = if min >= max {
                    min
                } else {
                    rand::thread_rng().gen_range(min..=max)
                };
                Duration::from_millis(base.saturating_mul(u64::from(attempt)))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Single-token path
    // -----------------------------------------------------------------------

    /// Lookup for one identifier. The shared cache is consulted first; the
    /// call-site LRU only answers when the shared cache misses.
    pub async fn fetch_one(&self, id: &str) -> Option<MarketRecord> {
        if let Some(record) = self.cache.get(&cache_key(id)) {
            return record;
        }
        let key = id.to_string();
        if let Some(record) = self.lru.get(&key) {
            return Some(record);
        }
        let record = self
            .fetch_batch(std::slice::from_ref(&key))
            .await
            .remove(id)
            .flatten();
        if let Some(r) = &record {
            self.lru.put(key, r.clone());
        }
        record
    }
}

/// Removes claimed ids from the in-flight map, then drops the sender so
/// waiters wake up and read the cache.
struct InflightGuard<'a> {
    map: &'a InflightMap,
    ids: Vec<String>,
    _done: watch::Sender<()>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut map = lock(self.map);
        for id in &self.ids {
            map.remove(id);
        }
    }
}

fn lock(map: &InflightMap) -> MutexGuard<'_, HashMap<String, watch::Receiver<()>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Pair selection
// ---------------------------------------------------------------------------

pub fn quality_score(pair: &PairData) -> f64 {
    let liquidity = pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
    let volume = pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0);
    liquidity + 0.01 * volume
}

pub fn to_record(pair: &PairData, fetched_at: DateTime<Utc>) -> MarketRecord {
    MarketRecord {
        pair_address: pair.pair_address.clone(),
        dex_id: pair.dex_id.clone(),
        symbol: pair.base_token.symbol.clone(),
        name: pair.base_token.name.clone(),
        price_usd: pair.price_usd,
        market_cap: pair.fdv.filter(|v| *v > 0.0).or(pair.market_cap),
        liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0),
        volume_24h: pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
        fetched_at,
    }
}

/// Best pair per requested id, matched on the pair's base token address
/// (case-insensitive). Ids with no matching pair are absent from the result.
pub fn select_best_pairs(
    ids: &[String],
    pairs: &[PairData],
    fetched_at: DateTime<Utc>,
) -> HashMap<String, MarketRecord> {
    let requested: HashMap<String, &String> =
        ids.iter().map(|id| (id.to_ascii_lowercase(), id)).collect();

    let mut best: HashMap<&String, &PairData> = HashMap::new();
    for pair in pairs {
        let Some(&id) = requested.get(&pair.base_token.address.to_ascii_lowercase()) else {
            continue;
        };
        let replace = best
            .get(&id)
            .map_or(true, |current| quality_score(pair) > quality_score(current));
        if replace {
            best.insert(id, pair);
        }
    }

    best.into_iter()
        .map(|(id, pair)| (id.clone(), to_record(pair, fetched_at)))
        .collect()
}
