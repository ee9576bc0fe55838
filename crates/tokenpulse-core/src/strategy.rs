//! Activity-based monitoring strategy.
//!
//! Every tracked token is placed in a [`Category`] derived from its age and
//! growth. The category picks how often the token is polled and how large a
//! move has to be before it alerts. Per-token strategy state (category and
//! last check time) lives in memory only and is rebuilt from the token store
//! after a restart.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::{CategoryTable, TokenMonitorConfig};
use crate::types::{Category, TokenState};

/// Classify a token. Pure: identical inputs give identical output.
///
/// | age        | hot                        | active                    | stable                   | inactive |
/// |------------|----------------------------|---------------------------|--------------------------|----------|
/// | < 1h       | always                     |                           |                          |          |
/// | 1h – 24h   | growth > 100% or recent > 10% | growth > 50% or recent > 5% | otherwise             |          |
/// | ≥ 24h      |                            | growth > 200% or recent > 20% | growth > 50% or recent > 5% | otherwise |
pub fn categorize(state: &TokenState, now: DateTime<Utc>) -> Category {
    let age = state.age(now);
    let growth = state.growth_percent();
    let recent = state.recent_growth_percent();

    if age < ChronoDuration::hours(1) {
        Category::Hot
    } else if age < ChronoDuration::hours(24) {
        if growth > 100.0 || recent > 10.0 {
            Category::Hot
        } else if growth > 50.0 || recent > 5.0 {
            Category::Active
        } else {
            Category::Stable
        }
    } else if growth > 200.0 || recent > 20.0 {
        Category::Active
    } else if growth > 50.0 || recent > 5.0 {
        Category::Stable
    } else {
        Category::Inactive
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    category: Category,
    last_check: Option<DateTime<Utc>>,
}

/// One row of [`MonitorStrategy::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct StrategyEntry {
    pub id: String,
    pub category: Category,
    pub last_check: Option<DateTime<Utc>>,
}

pub struct MonitorStrategy {
    table: CategoryTable,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MonitorStrategy {
    pub fn new(table: CategoryTable) -> Self {
        Self {
            table,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config_for(&self, category: Category) -> &TokenMonitorConfig {
        self.table.get(category)
    }

    /// Recompute and store the category from fresh metrics.
    pub fn update_category(&self, state: &TokenState, now: DateTime<Utc>) -> Category {
        let category = categorize(state, now);
        let mut entries = self.lock();
        let entry = entries.entry(state.id.clone()).or_insert(Entry {
            category,
            last_check: None,
        });
        if entry.category != category {
            debug!(
                token = %state.id,
                from = %entry.category,
                to = %category,
                "category changed"
            );
            entry.category = category;
        }
        category
    }

    pub fn category_of(&self, id: &str) -> Option<Category> {
        self.lock().get(id).map(|e| e.category)
    }

    /// True iff the category's check interval has elapsed since the last
    /// check. Marks the token as checked at `now` when it returns true.
    pub fn should_check(&self, state: &TokenState, now: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        let entry = entries.entry(state.id.clone()).or_insert_with(|| Entry {
            category: categorize(state, now),
            last_check: None,
        });
        let interval = self.table.get(entry.category).check_interval();
        let interval = ChronoDuration::from_std(interval).unwrap_or_else(|_| ChronoDuration::days(365));
        let due = match entry.last_check {
            None => true,
            Some(last) => now - last >= interval,
        };
        if due {
            entry.last_check = Some(now);
        }
        due
    }

    /// True iff `growth_percent` meets the token's category threshold.
    /// Unknown tokens are held to the strictest (inactive) threshold.
    pub fn should_alert(&self, id: &str, growth_percent: f64) -> bool {
        let category = self.category_of(id).unwrap_or(Category::Inactive);
        growth_percent >= self.table.get(category).growth_threshold_pct
    }

    /// Ids whose check interval has elapsed. Categories are assigned on first
    /// sight, and strategy state for ids no longer tracked is dropped.
    pub fn select_due(&self, tracked: &[TokenState], now: DateTime<Utc>) -> Vec<String> {
        let live: HashSet<&str> = tracked.iter().map(|t| t.id.as_str()).collect();
        let pruned = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|id, _| live.contains(id.as_str()));
            before - entries.len()
        };
        if pruned > 0 {
            debug!(pruned, "dropped strategy state for untracked tokens");
        }

        tracked
            .iter()
            .filter(|state| self.should_check(state, now))
            .map(|state| state.id.clone())
            .collect()
    }

    /// Record a completed check and re-categorize from the refreshed state.
    pub fn record_check(&self, state: &TokenState, now: DateTime<Utc>) -> Category {
        let category = self.update_category(state, now);
        if let Some(entry) = self.lock().get_mut(&state.id) {
            entry.last_check = Some(now);
        }
        category
    }

    pub fn forget(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> HashMap<Category, usize> {
        let mut counts = HashMap::new();
        for entry in self.lock().values() {
            *counts.entry(entry.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn snapshot(&self) -> Vec<StrategyEntry> {
        let mut rows: Vec<StrategyEntry> = self
            .lock()
            .iter()
            .map(|(id, e)| StrategyEntry {
                id: id.clone(),
                category: e.category,
                last_check: e.last_check,
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
