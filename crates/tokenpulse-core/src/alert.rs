//! Growth alerts and the sinks that deliver them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::error::{PulseError, Result};
use crate::types::{Category, TokenState};

/// Raised when a token's multiplier passes a new whole-number watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthAlert {
    pub id: Uuid,
    pub token: String,
    pub symbol: Option<String>,
    pub multiplier: f64,
    /// Watermark after this alert (`multiplier` truncated).
    pub watermark: u32,
    pub growth_percent: f64,
    pub market_cap: Option<f64>,
    pub market_cap_label: String,
    pub category: Category,
    pub raised_at: DateTime<Utc>,
}

impl GrowthAlert {
    pub fn new(
        state: &TokenState,
        multiplier: f64,
        watermark: u32,
        category: Category,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: state.id.clone(),
            symbol: state.symbol.clone(),
            multiplier,
            watermark,
            growth_percent: (multiplier - 1.0) * 100.0,
            market_cap: state.current_market_cap,
            market_cap_label: format_market_cap(state.current_market_cap),
            category,
            raised_at: now,
        }
    }
}

/// `$2.10B`, `$1.25M`, `$980.0K`, `$512.00`, or `N/A` when unknown.
pub fn format_market_cap(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => {
            if v >= 1e9 {
                format!("${:.2}B", v / 1e9)
            } else if v >= 1e6 {
                format!("${:.2}M", v / 1e6)
            } else if v >= 1e3 {
                format!("${:.1}K", v / 1e3)
            } else {
                format!("${v:.2}")
            }
        }
        _ => "N/A".to_string(),
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify_growth(&self, alert: &GrowthAlert) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Writes alerts to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify_growth(&self, alert: &GrowthAlert) -> Result<()> {
        info!(
            token = %alert.token,
            symbol = alert.symbol.as_deref().unwrap_or("?"),
            multiplier = %format!("{:.2}", alert.multiplier),
            market_cap = %alert.market_cap_label,
            category = %alert.category,
            "growth alert: {}x",
            alert.watermark
        );
        Ok(())
    }
}

/// Publishes alerts on a broadcast channel (consumed by the SSE endpoint).
/// Having no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastAlertSink {
    tx: broadcast::Sender<GrowthAlert>,
}

impl BroadcastAlertSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn from_sender(tx: broadcast::Sender<GrowthAlert>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GrowthAlert> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<GrowthAlert> {
        self.tx.clone()
    }
}

#[async_trait]
impl AlertSink for BroadcastAlertSink {
    async fn notify_growth(&self, alert: &GrowthAlert) -> Result<()> {
        let _ = self.tx.send(alert.clone());
        Ok(())
    }
}

/// Delivers to every inner sink; one failing sink does not stop the others.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    async fn notify_growth(&self, alert: &GrowthAlert) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify_growth(alert).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PulseError::Alert(failures.join("; ")))
        }
    }
}
