//! Cached multiplier lookup for the game engine.
//!
//! The game scales many base parameters at startup. Reading the config file
//! for each one is wasteful, so [`TuningLookup`] keeps the last read in a
//! [`CachedConfig`] and reloads only once it is older than the TTL.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::store::{TuningConfig, TuningStore};

/// Default time a loaded config is reused.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// A config read and when it was read. `value` is `None` when no config existed.
#[derive(Debug, Clone)]
pub struct CachedConfig {
    /// The config as read.
    pub value: Option<TuningConfig>,
    /// When it was read.
    pub fetched_at: Instant,
}

impl CachedConfig {
    /// Wrap a freshly read value.
    #[must_use]
    pub fn new(value: Option<TuningConfig>, fetched_at: Instant) -> Self {
        Self { value, fetched_at }
    }

    /// True once `ttl` has elapsed since the read.
    #[must_use]
    pub fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) >= ttl
    }
}

/// Multiplier lookup with an owned cache.
#[derive(Debug)]
pub struct TuningLookup {
    store: TuningStore,
    ttl: Duration,
    cache: Option<CachedConfig>,
}

impl TuningLookup {
    /// Create a lookup over a store.
    #[must_use]
    pub fn new(store: TuningStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: None,
        }
    }

    /// Drop the cached value so the next lookup reads the store.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Config as of `now`, reloading if stale.
    pub fn config_at(&mut self, now: Instant) -> Option<&TuningConfig> {
        let fresh = self
            .cache
            .as_ref()
            .is_some_and(|c| !c.is_stale(now, self.ttl));
        if !fresh {
            debug!(path = %self.store.config_path().display(), "Reloading tuning config");
            self.cache = Some(CachedConfig::new(self.store.read(), now));
        }
        self.cache.as_ref().and_then(|c| c.value.as_ref())
    }

    /// Multiplier for `key` as of `now`; 1.0 when absent.
    pub fn multiplier_at(&mut self, key: &str, now: Instant) -> f64 {
        self.config_at(now)
            .and_then(|config| config.multiplier(key))
            .unwrap_or(1.0)
    }

    /// Multiplier for `key`; 1.0 when absent.
    pub fn multiplier(&mut self, key: &str) -> f64 {
        self.multiplier_at(key, Instant::now())
    }

    /// `base` scaled by the multiplier for `key`.
    pub fn scaled(&mut self, key: &str, base: f64) -> f64 {
        base * self.multiplier(key)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::history::MetricsSnapshot;
    use crate::store::SCHEMA_VERSION;

    fn write(store: &TuningStore, key: &str, value: f64) {
        let mut adjustments = BTreeMap::new();
        adjustments.insert(key.to_string(), value);
        store
            .write(&TuningConfig {
                schema_version: SCHEMA_VERSION,
                generated_at: "t".to_string(),
                sessions_analyzed_count: 1,
                adjustments,
                insights: Vec::new(),
                metrics: MetricsSnapshot::default(),
                history: Vec::new(),
            })
            .unwrap();
    }

    #[test]
    fn test_staleness() {
        let t0 = Instant::now();
        let cached = CachedConfig::new(None, t0);
        let ttl = Duration::from_secs(10);
        assert!(!cached.is_stale(t0, ttl));
        assert!(!cached.is_stale(t0 + Duration::from_secs(9), ttl));
        assert!(cached.is_stale(t0 + ttl, ttl));
    }

    #[test]
    fn test_cached_until_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let store = TuningStore::in_dir(dir.path());
        write(&store, "food_consumption_rate", 0.85);

        let ttl = Duration::from_secs(30);
        let mut lookup = TuningLookup::new(store.clone(), ttl);
        let t0 = Instant::now();
        assert_eq!(lookup.multiplier_at("food_consumption_rate", t0), 0.85);

        write(&store, "food_consumption_rate", 0.5);
        assert_eq!(
            lookup.multiplier_at("food_consumption_rate", t0 + Duration::from_secs(5)),
            0.85
        );
        assert_eq!(
            lookup.multiplier_at("food_consumption_rate", t0 + ttl),
            0.5
        );
    }

    #[test]
    fn test_scaled_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TuningStore::in_dir(dir.path());
        let mut lookup = TuningLookup::new(store.clone(), DEFAULT_TTL);
        assert_eq!(lookup.scaled("theme.desert.supply_multiplier", 20.0), 20.0);

        write(&store, "theme.desert.supply_multiplier", 1.3);
        // Absence was cached too.
        assert_eq!(lookup.multiplier("theme.desert.supply_multiplier"), 1.0);
        lookup.invalidate();
        assert!((lookup.scaled("theme.desert.supply_multiplier", 20.0) - 26.0).abs() < 1e-9);
    }
}
