use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hiveworks_store::ContentStore;

use crate::bloom_dedup::BloomDeduplicator;
use crate::cleaner::TextCleaner;
use crate::error::GeneratorError;
use crate::pinyin_annotator::PinyinAnnotator;
use crate::stats::{self, WorkerCounters};

/// Atomic mirror of a worker's [`WorkerCounters`], readable from outside
/// while `run` is still looping so a stats manager can poll it on a
/// timer instead of waiting for the worker to exit.
#[derive(Default)]
pub struct SharedCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    total_processing_time_ms: AtomicU64,
}

impl SharedCounters {
    pub fn snapshot(&self) -> WorkerCounters {
        WorkerCounters {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            total_processing_time_ms: self.total_processing_time_ms.load(Ordering::Relaxed),
        }
    }
}

const KEY_PENDING: &str = "pending:articles";
const KEY_RETRY: &str = "pending:articles:retry";
const KEY_DEAD: &str = "pending:articles:dead";
const BLOCK_TIMEOUT_SECS: f64 = 5.0;
const RETRY_COUNTER_TTL_SECS: i64 = 86_400;

fn retry_counter_key(article_id: i64) -> String {
    format!("processor:retry:{article_id}")
}

/// Per-group accumulation of titles/contents awaiting a batch flush, plus
/// the dedup filters content in that group is checked against. The
/// `pending:articles` list is shared across every group in the deployment,
/// so a worker keeps one of these per group it has touched rather than one
/// fixed at construction time.
struct GroupState {
    title_dedup: BloomDeduplicator,
    para_dedup: BloomDeduplicator,
    titles: Vec<String>,
    contents: Vec<String>,
}

impl GroupState {
    fn new(group_id: i64) -> Self {
        Self {
            title_dedup: BloomDeduplicator::new(format!("dedup:title:{group_id}")),
            para_dedup: BloomDeduplicator::new(format!("dedup:para:{group_id}")),
            titles: Vec::new(),
            contents: Vec::new(),
        }
    }
}

/// Configuration shared by every worker in the pool.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub retry_max: u32,
    pub min_paragraph_length: usize,
    pub annotate_punctuation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            retry_max: 3,
            min_paragraph_length: 10,
            annotate_punctuation: true,
        }
    }
}

/// One content-generator worker: pop an article id, clean/annotate/dedup
/// its title and paragraphs, buffer them per the article's own group, and
/// flush on `batch_size` or stop.
pub struct Worker {
    conn: MultiplexedConnection,
    store: ContentStore,
    cleaner: TextCleaner,
    annotator: PinyinAnnotator,
    config: PipelineConfig,
    groups: HashMap<i64, GroupState>,
    counters: WorkerCounters,
    shared: Arc<SharedCounters>,
}

impl Worker {
    pub fn new(conn: MultiplexedConnection, store: ContentStore, config: PipelineConfig) -> Self {
        let cleaner = TextCleaner {
            min_length: config.min_paragraph_length,
            ..TextCleaner::default()
        };
        Self {
            conn,
            store,
            cleaner,
            annotator: PinyinAnnotator {
                annotate_punctuation: config.annotate_punctuation,
            },
            config,
            groups: HashMap::new(),
            counters: WorkerCounters::default(),
            shared: Arc::new(SharedCounters::default()),
        }
    }

    /// Clone before calling `run` to read this worker's counters live.
    pub fn shared_counters(&self) -> Arc<SharedCounters> {
        self.shared.clone()
    }

    /// Runs until `cancel` fires, then flushes every group's remaining
    /// buffered titles/contents before returning.
    pub async fn run(&mut self, cancel: &CancellationToken) -> WorkerCounters {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.pop_article_id().await {
                Ok(Some(article_id)) => {
                    let started = Instant::now();
                    if let Err(e) = self.process_one(article_id).await {
                        warn!(article_id, error = %e, "article processing failed");
                        self.on_failure(article_id).await;
                    } else {
                        self.on_success(article_id).await;
                    }
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.counters.total_processing_time_ms += elapsed_ms;
                    self.shared.total_processing_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "pipeline redis error, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        let group_ids: Vec<i64> = self.groups.keys().copied().collect();
        for group_id in group_ids {
            self.flush(group_id).await;
        }
        self.counters
    }

    async fn pop_article_id(&mut self) -> Result<Option<i64>, GeneratorError> {
        let result: Option<(String, String)> = self
            .conn
            .blpop(&[KEY_PENDING, KEY_RETRY], BLOCK_TIMEOUT_SECS)
            .await?;
        Ok(result.and_then(|(_, id)| id.parse().ok()))
    }

    /// Loads (and, on first touch, restores from Redis) the dedup filters
    /// for `group_id` before any buffer is written to.
    async fn ensure_group(&mut self, group_id: i64) {
        if self.groups.contains_key(&group_id) {
            return;
        }
        let mut state = GroupState::new(group_id);
        state.title_dedup.load_from_redis(&mut self.conn).await;
        state.para_dedup.load_from_redis(&mut self.conn).await;
        self.groups.insert(group_id, state);
    }

    async fn process_one(&mut self, article_id: i64) -> Result<(), GeneratorError> {
        let article = match self.store.get_article(article_id).await? {
            Some(a) => a,
            None => return Ok(()),
        };
        let group_id = article.group_id;
        self.ensure_group(group_id).await;

        if !article.title.is_empty() {
            let state = self.groups.get_mut(&group_id).expect("ensured above");
            if !state.title_dedup.exists(&article.title) {
                state.title_dedup.add(&article.title);
                state.titles.push(article.title.clone());
            }
        }

        if !article.content.is_empty() {
            for line in article.content.lines() {
                let Some(cleaned) = self.cleaner.clean_paragraph(line) else {
                    continue;
                };
                let state = self.groups.get_mut(&group_id).expect("ensured above");
                if state.para_dedup.exists(&cleaned) {
                    continue;
                }
                state.para_dedup.add(&cleaned);
                let annotated = self.annotator.annotate(&cleaned);
                state.contents.push(annotated);
            }
        }

        let flush_due = {
            let state = self.groups.get(&group_id).expect("ensured above");
            state.titles.len() >= self.config.batch_size || state.contents.len() >= self.config.batch_size
        };
        if flush_due {
            self.flush(group_id).await;
        }

        self.counters.processed += 1;
        self.shared.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&mut self, group_id: i64) {
        let Some(state) = self.groups.get_mut(&group_id) else {
            return;
        };

        if !state.titles.is_empty() {
            if let Err(e) = self.store.insert_titles_batch(group_id, &state.titles).await {
                warn!(error = %e, "title batch insert failed");
            }
            state.titles.clear();
        }
        if !state.contents.is_empty() {
            if let Err(e) = self.store.insert_contents_batch(group_id, &state.contents).await {
                warn!(error = %e, "content batch insert failed");
            }
            state.contents.clear();
        }
        state.title_dedup.save_to_redis(&mut self.conn).await;
        state.para_dedup.save_to_redis(&mut self.conn).await;
    }

    async fn on_success(&mut self, article_id: i64) {
        let _: Result<(), _> = self.conn.del(retry_counter_key(article_id)).await;
        if let Err(e) = stats::incr_processed_today(&mut self.conn).await {
            warn!(article_id, error = %e, "failed to bump today's processed counter");
        }
    }

    async fn on_failure(&mut self, article_id: i64) {
        let key = retry_counter_key(article_id);
        let count: i64 = self.conn.incr(&key, 1).await.unwrap_or(1);
        let _: Result<(), _> = self.conn.expire(&key, RETRY_COUNTER_TTL_SECS).await;

        if (count as u32) < self.config.retry_max {
            let _: Result<(), _> = self.conn.rpush(KEY_RETRY, article_id).await;
            self.counters.retried += 1;
            self.shared.retried.fetch_add(1, Ordering::Relaxed);
        } else {
            let _: Result<(), _> = self.conn.rpush(KEY_DEAD, article_id).await;
            let _: Result<(), _> = self.conn.del(&key).await;
            self.counters.failed += 1;
            self.shared.failed.fetch_add(1, Ordering::Relaxed);
            info!(article_id, "article moved to dead queue after exhausting retries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_counters_snapshot_reflects_atomic_updates() {
        let shared = SharedCounters::default();
        shared.processed.fetch_add(3, Ordering::Relaxed);
        shared.failed.fetch_add(1, Ordering::Relaxed);
        shared.retried.fetch_add(2, Ordering::Relaxed);
        shared.total_processing_time_ms.fetch_add(150, Ordering::Relaxed);

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retried, 2);
        assert_eq!(snapshot.total_processing_time_ms, 150);
    }

    #[test]
    fn new_group_state_starts_empty() {
        let state = GroupState::new(42);
        assert!(state.titles.is_empty());
        assert!(state.contents.is_empty());
    }
}
