use std::time::{Duration, Instant};

use bloomfilter::Bloom;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, error, info, warn};

const DEFAULT_ERROR_RATE: f64 = 0.001;
const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_INITIAL_CAPACITY: usize = 1_000_000;

fn hash(content: &str) -> String {
    let normalized: String = content.split_whitespace().collect();
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

/// Scalable-filter substitute: a single fixed-capacity `Bloom` sized for
/// `initial_capacity`, periodically persisted to Redis as raw bytes. The
/// source's auto-growing `ScalableBloomFilter` is approximated by sizing
/// generously up front rather than chaining filters, since `bloomfilter`
/// has no scalable variant.
pub struct BloomDeduplicator {
    key_prefix: String,
    save_interval: Duration,
    filter: Bloom<String>,
    dirty: bool,
    count: u64,
    last_saved: Instant,
}

impl BloomDeduplicator {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self::with_params(
            key_prefix,
            DEFAULT_ERROR_RATE,
            DEFAULT_SAVE_INTERVAL,
            DEFAULT_INITIAL_CAPACITY,
        )
    }

    pub fn with_params(
        key_prefix: impl Into<String>,
        error_rate: f64,
        save_interval: Duration,
        initial_capacity: usize,
    ) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            save_interval,
            filter: Bloom::new_for_fp_rate(initial_capacity, error_rate),
            dirty: false,
            count: 0,
            last_saved: Instant::now(),
        }
    }

    fn redis_key(&self) -> String {
        format!("{}:bloom", self.key_prefix)
    }

    pub fn exists(&self, content: &str) -> bool {
        self.filter.check(&hash(content))
    }

    /// Adds `content`'s hash if not already present. Returns whether it
    /// was newly added (an `add_if_new` alias of the source, collapsed
    /// into one method since the semantics are identical).
    pub fn add(&mut self, content: &str) -> bool {
        let h = hash(content);
        if self.filter.check(&h) {
            return false;
        }
        self.filter.set(&h);
        self.dirty = true;
        self.count += 1;
        true
    }

    pub fn get_count(&self) -> u64 {
        self.count
    }

    pub fn clear(&mut self) {
        self.filter = Bloom::new_for_fp_rate(DEFAULT_INITIAL_CAPACITY, DEFAULT_ERROR_RATE);
        self.count = 0;
        self.dirty = true;
    }

    pub async fn save_to_redis(&mut self, conn: &mut MultiplexedConnection) {
        if !self.dirty {
            return;
        }
        let bytes = self.filter.to_bytes();
        match conn
            .set::<_, _, ()>(self.redis_key(), bytes)
            .await
        {
            Ok(_) => {
                self.dirty = false;
                self.last_saved = Instant::now();
                debug!(prefix = %self.key_prefix, count = self.count, "bloom filter saved");
            }
            Err(e) => error!(prefix = %self.key_prefix, error = %e, "failed to save bloom filter"),
        }
    }

    pub async fn load_from_redis(&mut self, conn: &mut MultiplexedConnection) {
        let data: Option<Vec<u8>> = match conn.get(self.redis_key()).await {
            Ok(d) => d,
            Err(e) => {
                warn!(prefix = %self.key_prefix, error = %e, "failed to load bloom filter");
                return;
            }
        };

        if let Some(bytes) = data {
            match Bloom::from_bytes(&bytes) {
                Ok(filter) => {
                    self.filter = filter;
                    info!(prefix = %self.key_prefix, "bloom filter loaded from redis");
                }
                Err(e) => warn!(prefix = %self.key_prefix, error = %e, "corrupt bloom filter payload, starting fresh"),
            }
        }
    }

    /// Whether `save_interval` has elapsed since the last successful save.
    pub fn due_for_save(&self) -> bool {
        self.dirty && self.last_saved.elapsed() >= self.save_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_new_vs_duplicate() {
        let mut dedup = BloomDeduplicator::new("dedup:test");
        assert!(dedup.add("hello world"));
        assert!(!dedup.add("hello world"));
        assert_eq!(dedup.get_count(), 1);
    }

    #[test]
    fn hash_normalizes_whitespace() {
        assert_eq!(hash("hello   world"), hash("hello\nworld"));
    }

    #[test]
    fn exists_matches_prior_add() {
        let mut dedup = BloomDeduplicator::new("dedup:test");
        assert!(!dedup.exists("a title"));
        dedup.add("a title");
        assert!(dedup.exists("a title"));
    }

    #[test]
    fn clear_resets_state() {
        let mut dedup = BloomDeduplicator::new("dedup:test");
        dedup.add("x");
        dedup.clear();
        assert_eq!(dedup.get_count(), 0);
        assert!(!dedup.exists("x"));
    }
}
