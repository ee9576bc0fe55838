use crate::error::{PulseError, Result};
use crate::paths;
use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Hard upstream limit on identifiers per batch request.
pub const MAX_UPSTREAM_CHUNK: usize = 30;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Capacity of the single-token lookup LRU in front of the shared cache.
    #[serde(default = "default_lru_capacity")]
    pub lru_capacity: usize,
}

fn default_ttl_secs() -> u64 {
    120
}

fn default_lru_capacity() -> usize {
    512
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            lru_capacity: default_lru_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// ---------------------------------------------------------------------------
// FetchConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_chunk")]
    pub max_chunk: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Wait applied to a 429 that carries no usable `Retry-After`.
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,
}

fn default_base_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_max_chunk() -> usize {
    MAX_UPSTREAM_CHUNK
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_retry_after_secs() -> u64 {
    60
}

fn default_backoff_min_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_inter_chunk_delay_ms() -> u64 {
    200
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_chunk: default_max_chunk(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            default_retry_after_secs: default_retry_after_secs(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// SchedulerSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_tick_ms() -> u64 {
    100
}

fn default_max_concurrent_jobs() -> usize {
    8
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> pulse_scheduler::SchedulerConfig {
        pulse_scheduler::SchedulerConfig {
            tick: Duration::from_millis(self.tick_ms),
            max_concurrent: self.max_concurrent_jobs,
        }
    }
}

// ---------------------------------------------------------------------------
// LoopConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_notify_delay_min_ms")]
    pub notify_delay_min_ms: u64,
    #[serde(default = "default_notify_delay_max_ms")]
    pub notify_delay_max_ms: u64,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_initial_delay_secs() -> u64 {
    3
}

fn default_notify_delay_min_ms() -> u64 {
    300
}

fn default_notify_delay_max_ms() -> u64 {
    1_200
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            notify_delay_min_ms: default_notify_delay_min_ms(),
            notify_delay_max_ms: default_notify_delay_max_ms(),
        }
    }
}

impl LoopConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// TokenMonitorConfig / CategoryTable
// ---------------------------------------------------------------------------

/// Polling cadence and alert threshold for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenMonitorConfig {
    pub check_interval_secs: u64,
    pub growth_threshold_pct: f64,
}

impl TokenMonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTable {
    #[serde(default = "default_hot")]
    pub hot: TokenMonitorConfig,
    #[serde(default = "default_active")]
    pub active: TokenMonitorConfig,
    #[serde(default = "default_stable")]
    pub stable: TokenMonitorConfig,
    #[serde(default = "default_inactive")]
    pub inactive: TokenMonitorConfig,
}

fn default_hot() -> TokenMonitorConfig {
    TokenMonitorConfig {
        check_interval_secs: 30,
        growth_threshold_pct: 5.0,
    }
}

fn default_active() -> TokenMonitorConfig {
    TokenMonitorConfig {
        check_interval_secs: 180,
        growth_threshold_pct: 10.0,
    }
}

fn default_stable() -> TokenMonitorConfig {
    TokenMonitorConfig {
        check_interval_secs: 600,
        growth_threshold_pct: 15.0,
    }
}

fn default_inactive() -> TokenMonitorConfig {
    TokenMonitorConfig {
        check_interval_secs: 1_800,
        growth_threshold_pct: 20.0,
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            hot: default_hot(),
            active: default_active(),
            stable: default_stable(),
            inactive: default_inactive(),
        }
    }
}

impl CategoryTable {
    pub fn get(&self, category: Category) -> &TokenMonitorConfig {
        match category {
            Category::Hot => &self.hot,
            Category::Active => &self.active,
            Category::Stable => &self.stable,
            Category::Inactive => &self.inactive,
        }
    }
}

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub monitor: LoopConfig,
    #[serde(default)]
    pub categories: CategoryTable,
}

impl MonitorConfig {
    /// Load `<root>/.tokenpulse/config.yaml`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PulseError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: MonitorConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Like [`MonitorConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        match Self::load(root) {
            Err(PulseError::NotInitialized) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.cache.ttl_secs == 0 {
            error("cache.ttl_secs must be greater than 0".to_string());
        }
        if !(1..=MAX_UPSTREAM_CHUNK).contains(&self.fetch.max_chunk) {
            error(format!(
                "fetch.max_chunk must be between 1 and {MAX_UPSTREAM_CHUNK}, got {}",
                self.fetch.max_chunk
            ));
        }
        if self.fetch.max_attempts == 0 {
            error("fetch.max_attempts must be at least 1".to_string());
        }
        if self.fetch.request_timeout_secs == 0 {
            error("fetch.request_timeout_secs must be greater than 0".to_string());
        }
        if self.fetch.backoff_min_ms > self.fetch.backoff_max_ms {
            error("fetch.backoff_min_ms exceeds fetch.backoff_max_ms".to_string());
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            error("scheduler.max_concurrent_jobs must be at least 1".to_string());
        }
        if self.scheduler.tick_ms == 0 {
            error("scheduler.tick_ms must be greater than 0".to_string());
        }
        if self.monitor.interval_secs == 0 {
            error("monitor.interval_secs must be greater than 0".to_string());
        }
        if self.monitor.notify_delay_min_ms > self.monitor.notify_delay_max_ms {
            error("monitor.notify_delay_min_ms exceeds monitor.notify_delay_max_ms".to_string());
        }
        for &category in Category::all() {
            let c = self.categories.get(category);
            if c.check_interval_secs == 0 {
                error(format!("categories.{category}.check_interval_secs must be greater than 0"));
            }
            if !(c.growth_threshold_pct > 0.0) {
                error(format!("categories.{category}.growth_threshold_pct must be positive"));
            }
        }

        // Soft checks
        if self.monitor.interval_secs > self.categories.hot.check_interval_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "monitor.interval_secs ({}) is longer than the hot check interval ({}); hot tokens will be polled late",
                    self.monitor.interval_secs, self.categories.hot.check_interval_secs
                ),
            });
        }
        if self.cache.ttl_secs > self.categories.hot.check_interval_secs * 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "cache.ttl_secs is far longer than the hot check interval; hot tokens will see stale data".to_string(),
            });
        }

        warnings
    }

    /// Fail on any error-level finding from [`MonitorConfig::validate`].
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PulseError::InvalidConfig(errors.join("; ")))
        }
    }
}

/// Atomically write `data` to `path` using a tempfile in the same directory.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
