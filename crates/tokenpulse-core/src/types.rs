use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PulseError, Result};

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Activity tier that picks a token's polling cadence and alert sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Hot,
    Active,
    Stable,
    Inactive,
}

impl Category {
    pub fn all() -> &'static [Category] {
        &[
            Category::Hot,
            Category::Active,
            Category::Stable,
            Category::Inactive,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hot => "hot",
            Category::Active => "active",
            Category::Stable => "stable",
            Category::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MarketRecord
// ---------------------------------------------------------------------------

/// Market data for one token, taken from its best trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub pair_address: Option<String>,
    pub dex_id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub price_usd: Option<f64>,
    /// Fully diluted valuation when the pair reports one, else market cap.
    pub market_cap: Option<f64>,
    pub liquidity_usd: f64,
    pub volume_24h: f64,
    /// When the upstream response carrying this sample arrived. Cache hits
    /// hand back the same value.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TokenState
// ---------------------------------------------------------------------------

/// Per-token record kept in the token store.
///
/// The first observed market cap is the baseline for growth; `peak` only
/// ever rises. `alert_watermark` is the highest whole multiplier already
/// alerted on and starts at 1 (no growth).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub initial_market_cap: Option<f64>,
    #[serde(default)]
    pub peak_market_cap: Option<f64>,
    #[serde(default)]
    pub current_market_cap: Option<f64>,
    #[serde(default)]
    pub previous_market_cap: Option<f64>,
    #[serde(default)]
    pub price_usd: Option<f64>,
    /// `fetched_at` of the last sample folded in by [`TokenState::observe`].
    #[serde(default)]
    pub last_sample_at: Option<DateTime<Utc>>,
    #[serde(default = "default_watermark")]
    pub alert_watermark: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_watermark() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl TokenState {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            symbol: None,
            first_seen: now,
            initial_market_cap: None,
            peak_market_cap: None,
            current_market_cap: None,
            previous_market_cap: None,
            price_usd: None,
            last_sample_at: None,
            alert_watermark: default_watermark(),
            active: true,
            updated_at: now,
        }
    }

    /// Fold a market sample into the record. A sample already folded in
    /// (same `fetched_at`, e.g. served again from cache) leaves the
    /// previous/current pair untouched.
    pub fn observe(&mut self, record: &MarketRecord, now: DateTime<Utc>) {
        if self.symbol.is_none() {
            self.symbol = record.symbol.clone();
        }
        self.updated_at = now;
        if self.last_sample_at == Some(record.fetched_at) {
            return;
        }
        self.last_sample_at = Some(record.fetched_at);
        if record.price_usd.is_some() {
            self.price_usd = record.price_usd;
        }
        if let Some(cap) = record.market_cap.filter(|c| *c > 0.0) {
            if self.initial_market_cap.is_none() {
                self.initial_market_cap = Some(cap);
            }
            self.peak_market_cap = Some(self.peak_market_cap.map_or(cap, |p| p.max(cap)));
            self.previous_market_cap = self.current_market_cap;
            self.current_market_cap = Some(cap);
        }
    }

    /// `peak / initial`, once both are known.
    pub fn multiplier(&self) -> Option<f64> {
        match (self.initial_market_cap, self.peak_market_cap) {
            (Some(initial), Some(peak)) if initial > 0.0 => Some(peak / initial),
            _ => None,
        }
    }

    /// Peak-over-initial growth in percent; 0 when unknown.
    pub fn growth_percent(&self) -> f64 {
        self.multiplier().map_or(0.0, |m| (m - 1.0) * 100.0)
    }

    /// Growth between the last two samples in percent; 0 when unknown.
    pub fn recent_growth_percent(&self) -> f64 {
        match (self.previous_market_cap, self.current_market_cap) {
            (Some(prev), Some(cur)) if prev > 0.0 => (cur / prev - 1.0) * 100.0,
            _ => 0.0,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.first_seen
    }
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

/// Accepts base58 mint addresses and `0x`-prefixed hex contract addresses.
pub fn validate_identifier(id: &str) -> Result<()> {
    let ok = (20..=128).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(())
    } else {
        Err(PulseError::InvalidIdentifier(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(cap: f64, fetched_at: DateTime<Utc>) -> MarketRecord {
        MarketRecord {
            pair_address: None,
            dex_id: None,
            symbol: Some("PEPE".into()),
            name: None,
            price_usd: Some(0.001),
            market_cap: Some(cap),
            liquidity_usd: 10_000.0,
            volume_24h: 5_000.0,
            fetched_at,
        }
    }

    #[test]
    fn observe_tracks_initial_peak_and_recent() {
        let now = Utc::now();
        let mut t = TokenState::new("So11111111111111111111111111111111111111112", now);
        t.observe(&record_at(100.0, now), now);
        t.observe(&record_at(250.0, now + chrono::Duration::seconds(30)), now);
        t.observe(&record_at(200.0, now + chrono::Duration::seconds(60)), now);

        assert_eq!(t.initial_market_cap, Some(100.0));
        assert_eq!(t.peak_market_cap, Some(250.0));
        assert_eq!(t.previous_market_cap, Some(250.0));
        assert_eq!(t.current_market_cap, Some(200.0));
        assert_eq!(t.multiplier(), Some(2.5));
        assert!((t.growth_percent() - 150.0).abs() < 1e-9);
        assert!((t.recent_growth_percent() + 20.0).abs() < 1e-9);
        assert_eq!(t.symbol.as_deref(), Some("PEPE"));
    }

    #[test]
    fn same_sample_observed_twice_keeps_recent_growth() {
        let now = Utc::now();
        let mut t = TokenState::new("So11111111111111111111111111111111111111112", now);
        t.observe(&record_at(100.0, now), now);
        let spike = record_at(112.0, now + chrono::Duration::seconds(30));
        t.observe(&spike, now + chrono::Duration::seconds(30));
        t.observe(&spike, now + chrono::Duration::seconds(61));

        assert_eq!(t.previous_market_cap, Some(100.0));
        assert_eq!(t.current_market_cap, Some(112.0));
        assert!((t.recent_growth_percent() - 12.0).abs() < 1e-9);
        assert_eq!(t.updated_at, now + chrono::Duration::seconds(61));
    }

    #[test]
    fn missing_or_zero_cap_is_ignored() {
        let now = Utc::now();
        let mut t = TokenState::new("So11111111111111111111111111111111111111112", now);
        let mut r = record_at(0.0, now);
        t.observe(&r, now);
        r.market_cap = None;
        r.fetched_at = now + chrono::Duration::seconds(1);
        t.observe(&r, now);
        assert_eq!(t.multiplier(), None);
        assert_eq!(t.growth_percent(), 0.0);
        assert_eq!(t.recent_growth_percent(), 0.0);
    }

    #[test]
    fn watermark_defaults_to_one_when_missing_from_json() {
        let json = r#"{"id":"abc","first_seen":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z"}"#;
        let t: TokenState = serde_json::from_str(json).unwrap();
        assert_eq!(t.alert_watermark, 1);
        assert!(t.active);
    }

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("So11111111111111111111111111111111111111112").is_ok());
        assert!(validate_identifier("0x6982508145454Ce325dDbE47a25d4ec3d2311933").is_ok());
        assert!(validate_identifier("short").is_err());
        assert!(validate_identifier("has spaces in it but is long enough").is_err());
    }
}
