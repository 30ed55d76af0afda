//! Engine configuration
//!
//! A flat, injected configuration object, no process-wide singletons. Every
//! knob can also be driven from `MNEMO_*` environment variables via
//! [`EngineConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// When dirty sessions are flushed to the persistence backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSchedule {
    /// Fixed interval between persistence sweeps
    Interval(Duration),

    /// Persist this long *before* the cache TTL would expire, so a durable
    /// copy exists by the time the cache entry drops out
    TtlBuffer(Duration),
}

impl SyncSchedule {
    /// Resolve the effective sweep interval against the configured cache TTL
    pub fn effective_interval(&self, cache_ttl: Duration) -> Duration {
        match self {
            SyncSchedule::Interval(interval) => *interval,
            SyncSchedule::TtlBuffer(buffer) => {
                let interval = cache_ttl.saturating_sub(*buffer);
                // A buffer at or above the TTL would mean "sync constantly".
                if interval.is_zero() {
                    Duration::from_secs(60)
                } else {
                    interval
                }
            }
        }
    }
}

impl Default for SyncSchedule {
    fn default() -> Self {
        SyncSchedule::TtlBuffer(Duration::from_secs(300))
    }
}

impl FromStr for SyncSchedule {
    type Err = String;

    /// Parse `"ttl+300"` (persist 300s before cache expiry) or a plain
    /// number of seconds (`"300"`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if let Some(buffer) = s.strip_prefix("ttl+") {
            let secs: u64 = buffer
                .parse()
                .map_err(|_| format!("invalid ttl buffer: {:?}", s))?;
            return Ok(SyncSchedule::TtlBuffer(Duration::from_secs(secs)));
        }
        let secs: u64 = s
            .parse()
            .map_err(|_| format!("invalid sync schedule: {:?}", s))?;
        Ok(SyncSchedule::Interval(Duration::from_secs(secs)))
    }
}

/// Retry policy for persistence writes
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum save attempts before surfacing the failure
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,

    /// Upper bound on any single backoff delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (1-based), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Configuration for the session memory engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Use the cache tier when a backend is attached. Disabling acts as a
    /// kill switch: an attached backend is skipped entirely.
    pub cache_enabled: bool,

    /// Cache connection URL (e.g. `redis://127.0.0.1:6379`)
    pub cache_url: String,

    /// Key prefix for cache entries
    pub cache_prefix: String,

    /// Cache entry time-to-live
    pub cache_ttl: Duration,

    /// Maximum concurrent outstanding cache operations
    pub cache_pool_size: usize,

    /// How long a cache operation may wait for a pool slot before degrading
    pub cache_acquire_timeout: Duration,

    /// When dirty sessions are flushed to persistence
    pub sync_schedule: SyncSchedule,

    /// Persist a dirty session when it is closed
    pub sync_on_close: bool,

    /// Token threshold that triggers summarization
    pub max_tokens: usize,

    /// Most recent messages never summarized away
    pub preserve_recent: usize,

    /// In-memory store capacity before LRU eviction
    pub max_sessions: usize,

    /// Dedicated timeout for the summarization call, distinct from any
    /// overall turn timeout
    pub summarize_timeout: Duration,

    /// Retry policy for persistence writes
    pub persist_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_url: "redis://127.0.0.1:6379".to_string(),
            cache_prefix: "chat:".to_string(),
            cache_ttl: Duration::from_secs(3600),
            cache_pool_size: 16,
            cache_acquire_timeout: Duration::from_secs(5),
            sync_schedule: SyncSchedule::default(),
            sync_on_close: true,
            max_tokens: 4000,
            preserve_recent: 5,
            max_sessions: 10_000,
            summarize_timeout: Duration::from_secs(30),
            persist_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable/disable the cache tier
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Set the cache connection URL
    pub fn with_cache_url(mut self, url: impl Into<String>) -> Self {
        self.cache_url = url.into();
        self
    }

    /// Set the cache key prefix
    pub fn with_cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    /// Set the cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the sync schedule
    pub fn with_sync_schedule(mut self, schedule: SyncSchedule) -> Self {
        self.sync_schedule = schedule;
        self
    }

    /// Enable/disable sync on close
    pub fn with_sync_on_close(mut self, sync: bool) -> Self {
        self.sync_on_close = sync;
        self
    }

    /// Set the summarization token threshold
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set how many recent messages are always kept verbatim
    pub fn with_preserve_recent(mut self, preserve_recent: usize) -> Self {
        self.preserve_recent = preserve_recent;
        self
    }

    /// Set the in-memory store capacity
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Set the summarization timeout
    pub fn with_summarize_timeout(mut self, timeout: Duration) -> Self {
        self.summarize_timeout = timeout;
        self
    }

    /// Set the persistence retry policy
    pub fn with_persist_retry(mut self, retry: RetryPolicy) -> Self {
        self.persist_retry = retry;
        self
    }

    /// The effective persistence sweep interval for this configuration
    pub fn sync_interval(&self) -> Duration {
        self.sync_schedule.effective_interval(self.cache_ttl)
    }

    /// Build a configuration from `MNEMO_*` environment variables, starting
    /// from defaults. Unparseable values are logged and skipped.
    ///
    /// Recognized variables: `MNEMO_CACHE_ENABLED`, `MNEMO_CACHE_URL`,
    /// `MNEMO_CACHE_PREFIX`, `MNEMO_CACHE_TTL` (secs),
    /// `MNEMO_CACHE_POOL_SIZE`, `MNEMO_CACHE_ACQUIRE_TIMEOUT` (secs),
    /// `MNEMO_SYNC_SCHEDULE` (`"300"` or `"ttl+300"`),
    /// `MNEMO_SYNC_ON_CLOSE`, `MNEMO_MAX_TOKENS`, `MNEMO_PRESERVE_RECENT`,
    /// `MNEMO_MAX_SESSIONS`, `MNEMO_SUMMARIZE_TIMEOUT` (secs),
    /// `MNEMO_PERSIST_MAX_ATTEMPTS`, `MNEMO_PERSIST_BASE_DELAY` (ms).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_bool("MNEMO_CACHE_ENABLED") {
            config.cache_enabled = v;
        }
        if let Ok(v) = std::env::var("MNEMO_CACHE_URL") {
            config.cache_url = v;
        }
        if let Ok(v) = std::env::var("MNEMO_CACHE_PREFIX") {
            config.cache_prefix = v;
        }
        if let Some(v) = env_u64("MNEMO_CACHE_TTL") {
            config.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("MNEMO_CACHE_POOL_SIZE") {
            config.cache_pool_size = v as usize;
        }
        if let Ok(v) = std::env::var("MNEMO_SYNC_SCHEDULE") {
            match v.parse() {
                Ok(schedule) => config.sync_schedule = schedule,
                Err(e) => warn!(value = %v, error = %e, "Invalid MNEMO_SYNC_SCHEDULE, keeping default"),
            }
        }
        if let Some(v) = env_bool("MNEMO_SYNC_ON_CLOSE") {
            config.sync_on_close = v;
        }
        if let Some(v) = env_u64("MNEMO_MAX_TOKENS") {
            config.max_tokens = v as usize;
        }
        if let Some(v) = env_u64("MNEMO_PRESERVE_RECENT") {
            config.preserve_recent = v as usize;
        }
        if let Some(v) = env_u64("MNEMO_MAX_SESSIONS") {
            config.max_sessions = v as usize;
        }
        if let Some(v) = env_u64("MNEMO_SUMMARIZE_TIMEOUT") {
            config.summarize_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("MNEMO_CACHE_ACQUIRE_TIMEOUT") {
            config.cache_acquire_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("MNEMO_PERSIST_MAX_ATTEMPTS") {
            config.persist_retry.max_attempts = v as u32;
        }
        if let Some(v) = env_u64("MNEMO_PERSIST_BASE_DELAY") {
            config.persist_retry.base_delay = Duration::from_millis(v);
        }

        config
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!(var = name, value = other, "Invalid boolean, keeping default");
            None
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Invalid number, keeping default");
            None
        }
    }
}
