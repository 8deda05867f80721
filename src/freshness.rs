use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use crate::models::{Fields, Model};

const EVICTION_INTERVAL: Duration = Duration::from_secs(1);

/// Content hashes identifying one model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    dimensions: u64,
    metadata: u64,
}

impl Fingerprint {
    fn of(model: &Model) -> Self {
        Self {
            dimensions: hash_fields(&model.dimensions),
            metadata: hash_fields(&model.metadata_fields),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    metadata_hash: u64,
    seen: Instant,
}

/// Remembers recently sent models so unchanged ones are not resent until
/// `ttl` has passed.
///
/// Entries are keyed by a hash of the model's dimensions only, so two
/// distinct dimension sets that collide are treated as the same entity.
#[derive(Debug, Clone)]
pub struct FreshnessChecker {
    entries: Arc<Mutex<HashMap<u64, Entry>>>,
    ttl: Duration,
}

impl FreshnessChecker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Returns true when an identical model was recorded within the TTL.
    /// Otherwise records this model and returns false.
    pub fn is_fresh(&self, model: &Model) -> bool {
        let fingerprint = Fingerprint::of(model);
        let now = Instant::now();

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&fingerprint.dimensions) {
            if entry.metadata_hash == fingerprint.metadata && !self.expired(entry, now) {
                return true;
            }
        }

        entries.insert(
            fingerprint.dimensions,
            Entry {
                metadata_hash: fingerprint.metadata,
                seen: now,
            },
        );
        false
    }

    /// Drops every entry older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.expired(entry, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs eviction once per second until `shutdown` flips to true or its
    /// sender is dropped.
    pub fn spawn_eviction(
        &self,
        handle: &tokio::runtime::Handle,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let checker = self.clone();
        handle.spawn(async move {
            let mut ticker = interval(EVICTION_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = checker.evict_expired(Instant::now());
                        if evicted > 0 {
                            debug!(evicted, "evicted expired model entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("freshness eviction stopped");
        })
    }

    fn expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.seen) > self.ttl
    }
}

/// Order-independent content hash: `Fields` iterates in key order.
fn hash_fields(fields: &Fields) -> u64 {
    let mut hasher = DefaultHasher::new();
    fields.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(dimensions: &[(&str, &str)], metadata: &[(&str, &str)]) -> Model {
        let to_fields = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Fields>()
        };
        Model {
            timestamp: 0,
            dimensions: to_fields(dimensions),
            metadata_fields: to_fields(metadata),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_model_is_suppressed() {
        let checker = FreshnessChecker::new(Duration::from_secs(3600));
        let m = model(&[("service", "api")], &[("name", "api")]);

        assert!(!checker.is_fresh(&m));
        assert!(checker.is_fresh(&m));
        assert_eq!(checker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_metadata_is_resent() {
        let checker = FreshnessChecker::new(Duration::from_secs(3600));
        let before = model(&[("service", "api")], &[("version", "1")]);
        let after = model(&[("service", "api")], &[("version", "2")]);

        assert!(!checker.is_fresh(&before));
        assert!(!checker.is_fresh(&after));
        assert!(checker.is_fresh(&after));
        // The entry now tracks the newer metadata.
        assert!(!checker.is_fresh(&before));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_model_is_resent() {
        let checker = FreshnessChecker::new(Duration::from_secs(10));
        let m = model(&[("service", "api")], &[("name", "api")]);

        assert!(!checker.is_fresh(&m));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!checker.is_fresh(&m));
        assert!(checker.is_fresh(&m));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let checker = FreshnessChecker::new(Duration::from_secs(10));
        checker.is_fresh(&model(&[("service", "a")], &[]));
        tokio::time::advance(Duration::from_secs(6)).await;
        checker.is_fresh(&model(&[("service", "b")], &[]));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(checker.evict_expired(Instant::now()), 1);
        assert_eq!(checker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_eviction_and_shutdown() {
        let checker = FreshnessChecker::new(Duration::from_secs(2));
        let (tx, rx) = watch::channel(false);
        let task = checker.spawn_eviction(&tokio::runtime::Handle::current(), rx);

        checker.is_fresh(&model(&[("service", "api")], &[]));
        assert_eq!(checker.len(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(checker.is_empty());

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let mut a = Fields::new();
        a.insert("x".into(), "1".into());
        a.insert("y".into(), "2".into());
        let mut b = Fields::new();
        b.insert("y".into(), "2".into());
        b.insert("x".into(), "1".into());
        assert_eq!(hash_fields(&a), hash_fields(&b));
    }
}
