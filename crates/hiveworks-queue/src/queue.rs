use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hiveworks_types::Request;

use crate::error::QueueError;
use crate::keys::QueueKeys;
use crate::stats::QueueStats;
use crate::state::QueueState;

/// In-flight entry stored in the `processing` hash: the request's own JSON
/// blob plus the wall-clock time it was popped, used by `recover_timeout`.
#[derive(Serialize, Deserialize)]
struct ProcessingEntry {
    request: String,
    start_time: f64,
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Redis-backed priority queue for one project's requests.
///
/// Lifecycle: enqueue -> pop into `processing` -> `complete`/`retry`.
/// `recover_timeout` reclaims entries that have sat in `processing` longer
/// than [`RequestQueue::PROCESSING_TIMEOUT`] (a crashed or hung worker never
/// silently drops work).
pub struct RequestQueue {
    conn: MultiplexedConnection,
    keys: QueueKeys,
}

impl RequestQueue {
    pub const PROCESSING_TIMEOUT: Duration = Duration::from_secs(300);
    const POP_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(conn: MultiplexedConnection, project_id: i64, is_test: bool) -> Self {
        Self {
            conn,
            keys: QueueKeys::new(project_id, is_test),
        }
    }

    /// Enqueue a request. Returns `false` (no-op) if its fingerprint was
    /// already seen and `dont_filter` is not set.
    pub async fn push(&mut self, request: &Request) -> Result<bool, QueueError> {
        let fingerprint = request.fingerprint();

        if !request.dont_filter {
            let seen: bool = self.conn.sismember(self.keys.seen(), &fingerprint).await?;
            if seen {
                debug!(url = %request.url, "request already seen, skipped");
                return Ok(false);
            }
        }

        self.conn.sadd::<_, _, ()>(self.keys.seen(), &fingerprint).await?;

        let score = request.score();
        let payload = request
            .to_json()
            .map_err(|e| QueueError::Corrupt(format!("failed to serialize request: {e}")))?;
        self.conn
            .zadd::<_, _, _, ()>(self.keys.pending(), payload, score)
            .await?;

        if request.is_detail_callback() {
            self.conn.hincr::<_, _, _, ()>(self.keys.stats(), "total", 1).await?;
        }

        debug!(url = %request.url, priority = request.priority, "request pushed");
        Ok(true)
    }

    pub async fn push_many(&mut self, requests: &[Request]) -> Result<usize, QueueError> {
        let mut count = 0;
        for request in requests {
            if self.push(request).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Pop the highest-priority pending request. Returns `None` if the
    /// queue is paused/stopped, empty, or the Redis round-trip exceeds
    /// [`Self::POP_TIMEOUT`].
    pub async fn pop(&mut self) -> Result<Option<Request>, QueueError> {
        let state = self.get_state().await?;
        if state.blocks_pop() {
            debug!(%state, "pop skipped, queue not running");
            return Ok(None);
        }

        let result: Vec<(String, f64)> = match tokio::time::timeout(
            Self::POP_TIMEOUT,
            self.conn.zpopmin(self.keys.pending(), 1),
        )
        .await
        {
            Ok(res) => res?,
            Err(_) => {
                warn!(timeout = ?Self::POP_TIMEOUT, "zpopmin timed out");
                return Err(QueueError::PopTimeout(Self::POP_TIMEOUT));
            }
        };

        let Some((payload, _score)) = result.into_iter().next() else {
            return Ok(None);
        };

        let request = Request::from_json(&payload)
            .map_err(|e| QueueError::Corrupt(format!("failed to parse pending entry: {e}")))?;

        let entry = ProcessingEntry {
            request: payload,
            start_time: now_secs(),
        };
        let entry_json = serde_json::to_string(&entry)
            .map_err(|e| QueueError::Corrupt(format!("failed to serialize processing entry: {e}")))?;
        self.conn
            .hset::<_, _, _, ()>(self.keys.processing(), request.fingerprint(), entry_json)
            .await?;

        debug!(url = %request.url, "request popped");
        Ok(Some(request))
    }

    /// Mark a popped request done. On success its fingerprint moves to
    /// `completed` (for resume-skip checks); on failure only the failed
    /// counter is bumped — callers that want a durable record use a
    /// failed-request store alongside this.
    pub async fn complete(&mut self, request: &Request, success: bool) -> Result<(), QueueError> {
        let fingerprint = request.fingerprint();
        self.conn.hdel::<_, _, ()>(self.keys.processing(), &fingerprint).await?;

        if success {
            self.conn.sadd::<_, _, ()>(self.keys.completed(), &fingerprint).await?;
            if request.is_detail_callback() {
                self.conn
                    .hincr::<_, _, _, ()>(self.keys.stats(), "completed", 1)
                    .await?;
            }
            debug!(url = %request.url, "request completed");
        } else {
            if request.is_detail_callback() {
                self.conn.hincr::<_, _, _, ()>(self.keys.stats(), "failed", 1).await?;
            }
            debug!(url = %request.url, "request failed");
        }
        Ok(())
    }

    /// Re-enqueue `request` with an incremented retry count. Returns
    /// `false` once `max_retries` is exhausted — the caller is then
    /// responsible for `complete(request, false)` and failed-store
    /// persistence.
    pub async fn retry(&mut self, request: &Request) -> Result<bool, QueueError> {
        self.conn
            .hdel::<_, _, ()>(self.keys.processing(), request.fingerprint())
            .await?;

        if request.retry_count >= request.max_retries {
            warn!(url = %request.url, "request exceeded max retries");
            return Ok(false);
        }

        let retried = request.bump_retry();
        let payload = retried
            .to_json()
            .map_err(|e| QueueError::Corrupt(format!("failed to serialize request: {e}")))?;
        self.conn
            .zadd::<_, _, _, ()>(self.keys.pending(), payload, retried.score())
            .await?;

        if request.is_detail_callback() {
            self.conn.hincr::<_, _, _, ()>(self.keys.stats(), "retried", 1).await?;
        }

        debug!(
            url = %request.url,
            retry_count = retried.retry_count,
            max_retries = retried.max_retries,
            "request retried"
        );
        Ok(true)
    }

    /// Re-enqueue any `processing` entry older than
    /// [`Self::PROCESSING_TIMEOUT`], bumping its retry count like [`Self::retry`];
    /// entries that have exhausted retries are counted failed instead.
    /// Returns the number of entries recovered (retried, not failed).
    pub async fn recover_timeout(&mut self) -> Result<u64, QueueError> {
        let processing: Vec<(String, String)> = self.conn.hgetall(self.keys.processing()).await?;
        let now = now_secs();
        let mut recovered = 0u64;

        for (fingerprint, data) in processing {
            let entry: ProcessingEntry = match serde_json::from_str(&data) {
                Ok(e) => e,
                Err(e) => {
                    warn!(%fingerprint, error = %e, "dropping corrupt processing entry");
                    self.conn.hdel::<_, _, ()>(self.keys.processing(), &fingerprint).await?;
                    continue;
                }
            };

            if now - entry.start_time <= Self::PROCESSING_TIMEOUT.as_secs_f64() {
                continue;
            }

            let request = match Request::from_json(&entry.request) {
                Ok(r) => r,
                Err(e) => {
                    warn!(%fingerprint, error = %e, "dropping corrupt processing request");
                    self.conn.hdel::<_, _, ()>(self.keys.processing(), &fingerprint).await?;
                    continue;
                }
            };

            let retried = request.bump_retry();
            if retried.retry_count <= retried.max_retries {
                let payload = retried.to_json().map_err(|e| {
                    QueueError::Corrupt(format!("failed to serialize request: {e}"))
                })?;
                self.conn
                    .zadd::<_, _, _, ()>(self.keys.pending(), payload, retried.score())
                    .await?;
                if request.is_detail_callback() {
                    self.conn
                        .hincr::<_, _, _, ()>(self.keys.stats(), "retried", 1)
                        .await?;
                }
                recovered += 1;
                info!(url = %request.url, "recovered timeout request");
            } else {
                if request.is_detail_callback() {
                    self.conn.hincr::<_, _, _, ()>(self.keys.stats(), "failed", 1).await?;
                }
                warn!(url = %request.url, "timeout request exceeded max retries");
            }

            self.conn.hdel::<_, _, ()>(self.keys.processing(), &fingerprint).await?;
        }

        if recovered > 0 {
            info!(recovered, "recovered timeout requests");
        }
        Ok(recovered)
    }

    pub async fn get_stats(&mut self) -> Result<QueueStats, QueueError> {
        let raw: std::collections::HashMap<String, i64> = self.conn.hgetall(self.keys.stats()).await?;
        let pending: i64 = self.conn.zcard(self.keys.pending()).await?;
        let processing: i64 = self.conn.hlen(self.keys.processing()).await?;

        Ok(QueueStats {
            total: *raw.get("total").unwrap_or(&0),
            completed: *raw.get("completed").unwrap_or(&0),
            failed: *raw.get("failed").unwrap_or(&0),
            retried: *raw.get("retried").unwrap_or(&0),
            pending,
            processing,
        })
    }

    pub async fn get_state(&mut self) -> Result<QueueState, QueueError> {
        let raw: Option<String> = self.conn.get(self.keys.state()).await?;
        Ok(raw.map(|s| QueueState::from_str(&s)).unwrap_or(QueueState::Idle))
    }

    pub async fn set_state(&mut self, state: QueueState) -> Result<(), QueueError> {
        self.conn.set::<_, _, ()>(self.keys.state(), state.as_str()).await?;
        info!(%state, "queue state changed");
        Ok(())
    }

    pub async fn pause(&mut self) -> Result<(), QueueError> {
        self.set_state(QueueState::Paused).await
    }

    pub async fn resume(&mut self) -> Result<(), QueueError> {
        self.set_state(QueueState::Running).await
    }

    pub async fn stop(&mut self, clear_queue: bool) -> Result<(), QueueError> {
        self.set_state(QueueState::Stopped).await?;
        if clear_queue {
            self.clear().await?;
        }
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<(), QueueError> {
        let keys = self.keys.all();
        self.conn.del::<_, ()>(keys.as_slice()).await?;
        info!("queue cleared");
        Ok(())
    }

    pub async fn is_empty(&mut self) -> Result<bool, QueueError> {
        let pending: i64 = self.conn.zcard(self.keys.pending()).await?;
        let processing: i64 = self.conn.hlen(self.keys.processing()).await?;
        Ok(pending == 0 && processing == 0)
    }

    pub async fn get_item_count(&mut self) -> Result<i64, QueueError> {
        Ok(self.conn.get(self.keys.item_count()).await?.unwrap_or(0))
    }

    pub async fn incr_item_count(&mut self) -> Result<i64, QueueError> {
        Ok(self.conn.incr(self.keys.item_count(), 1).await?)
    }

    pub async fn get_queued_count(&mut self) -> Result<i64, QueueError> {
        Ok(self.conn.get(self.keys.queued_count()).await?.unwrap_or(0))
    }

    pub async fn incr_queued_count(&mut self) -> Result<i64, QueueError> {
        Ok(self.conn.incr(self.keys.queued_count(), 1).await?)
    }

    pub async fn is_url_completed(&mut self, url: &str) -> Result<bool, QueueError> {
        let probe = Request::new(url.to_string());
        Ok(self.conn.sismember(self.keys.completed(), probe.fingerprint()).await?)
    }

    pub async fn get_pending_count(&mut self) -> Result<i64, QueueError> {
        Ok(self.conn.zcard(self.keys.pending()).await?)
    }

    pub async fn get_processing_count(&mut self) -> Result<i64, QueueError> {
        Ok(self.conn.hlen(self.keys.processing()).await?)
    }
}
