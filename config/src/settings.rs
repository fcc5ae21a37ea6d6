//! Typed view of the hub's environment knobs.
//!
//! Read after [`crate::load_and_apply`] so `.env`/XDG values are visible.
//! Unset or unparseable keys fall back to the documented defaults; upstream
//! secrets are never read here.

/// Hub settings sourced from `CAPHUB_*` environment variables.
#[derive(Clone, Debug, PartialEq)]
pub struct HubSettings {
    /// Worker pool size (`CAPHUB_POOL_SIZE`, default 4).
    pub pool_size: usize,
    /// Checkpoint cadence in ms (`CAPHUB_CHECKPOINT_INTERVAL_MS`, default 10_000).
    pub checkpoint_interval_ms: u64,
    /// Default run timeout in ms (`CAPHUB_DEFAULT_TIMEOUT_MS`, default 60_000).
    pub default_timeout_ms: u64,
    /// Process-wide timeout ceiling in ms (`CAPHUB_MAX_TIMEOUT_MS`, default 600_000).
    pub max_timeout_ms: u64,
    /// Health probe interval in ms (`CAPHUB_HEALTH_INTERVAL_MS`, default 30_000).
    pub health_interval_ms: u64,
    /// Consecutive probe failures before `unhealthy` (`CAPHUB_UNHEALTHY_THRESHOLD`, default 3).
    pub unhealthy_threshold: u32,
    /// Routing confidence floor (`CAPHUB_MIN_CONFIDENCE`, default 0.5).
    pub min_confidence: f64,
    /// Registration cap per system (`CAPHUB_MAX_AGENTS_PER_SYSTEM`, default 100).
    pub max_agents_per_system: usize,
    /// Distributed dispatch flag (`CAPHUB_DISTRIBUTED`, default false).
    pub distributed: bool,
    /// Remote queue endpoint (`CAPHUB_QUEUE_URL`); opaque to the core.
    pub queue_url: Option<String>,
    /// Backing store endpoint (`CAPHUB_STORE_URL`); opaque to the core.
    pub store_url: Option<String>,
    /// Per-subscriber event buffer capacity (`CAPHUB_BUS_CAPACITY`, default 256).
    pub bus_capacity: usize,
    /// Grace window after abort before force termination (`CAPHUB_GRACE_MS`, default 5_000).
    pub grace_ms: u64,
    /// Queue lease duration in ms (`CAPHUB_LEASE_TTL_MS`, default 30_000).
    pub lease_ttl_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            pool_size: 4,
            checkpoint_interval_ms: 10_000,
            default_timeout_ms: 60_000,
            max_timeout_ms: 600_000,
            health_interval_ms: 30_000,
            unhealthy_threshold: 3,
            min_confidence: 0.5,
            max_agents_per_system: 100,
            distributed: false,
            queue_url: None,
            store_url: None,
            bus_capacity: 256,
            grace_ms: 5_000,
            lease_ttl_ms: 30_000,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

impl HubSettings {
    /// Reads all `CAPHUB_*` keys from the environment, defaulting the rest.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            pool_size: parsed("CAPHUB_POOL_SIZE").unwrap_or(d.pool_size),
            checkpoint_interval_ms: parsed("CAPHUB_CHECKPOINT_INTERVAL_MS")
                .unwrap_or(d.checkpoint_interval_ms),
            default_timeout_ms: parsed("CAPHUB_DEFAULT_TIMEOUT_MS").unwrap_or(d.default_timeout_ms),
            max_timeout_ms: parsed("CAPHUB_MAX_TIMEOUT_MS").unwrap_or(d.max_timeout_ms),
            health_interval_ms: parsed("CAPHUB_HEALTH_INTERVAL_MS").unwrap_or(d.health_interval_ms),
            unhealthy_threshold: parsed("CAPHUB_UNHEALTHY_THRESHOLD")
                .unwrap_or(d.unhealthy_threshold),
            min_confidence: parsed("CAPHUB_MIN_CONFIDENCE").unwrap_or(d.min_confidence),
            max_agents_per_system: parsed("CAPHUB_MAX_AGENTS_PER_SYSTEM")
                .unwrap_or(d.max_agents_per_system),
            distributed: std::env::var("CAPHUB_DISTRIBUTED")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(d.distributed),
            queue_url: std::env::var("CAPHUB_QUEUE_URL").ok().filter(|s| !s.is_empty()),
            store_url: std::env::var("CAPHUB_STORE_URL").ok().filter(|s| !s.is_empty()),
            bus_capacity: parsed("CAPHUB_BUS_CAPACITY").unwrap_or(d.bus_capacity),
            grace_ms: parsed("CAPHUB_GRACE_MS").unwrap_or(d.grace_ms),
            lease_ttl_ms: parsed("CAPHUB_LEASE_TTL_MS").unwrap_or(d.lease_ttl_ms),
        }
    }
}
