use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;

use crate::error::GeneratorError;

/// Realtime snapshot published roughly every 5s while the pipeline runs.
#[derive(Debug, Clone, Serialize, Default)]
pub struct GeneratorStats {
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub total_processing_time_ms: u64,
    pub pending: i64,
    pub retry: i64,
    pub dead: i64,
    pub processed_today: i64,
    pub speed: f64,
}

/// Counters a single worker accumulates between stats publishes; merged
/// into the manager's aggregate by `+=`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerCounters {
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub total_processing_time_ms: u64,
}

impl std::ops::AddAssign for WorkerCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.failed += rhs.failed;
        self.retried += rhs.retried;
        self.total_processing_time_ms += rhs.total_processing_time_ms;
    }
}

const KEY_PENDING: &str = "pending:articles";
const KEY_RETRY: &str = "pending:articles:retry";
const KEY_DEAD: &str = "pending:articles:dead";
const KEY_STATUS: &str = "processor:status:realtime";
const CHANNEL_REALTIME: &str = "processor:stats:realtime";
const PROCESSED_TODAY_TTL_SECS: i64 = 172_800;

pub async fn publish(
    conn: &mut MultiplexedConnection,
    counters: WorkerCounters,
    previous_processed: u64,
    elapsed_secs: f64,
) -> Result<GeneratorStats, GeneratorError> {
    let pending: i64 = conn.llen(KEY_PENDING).await?;
    let retry: i64 = conn.llen(KEY_RETRY).await?;
    let dead: i64 = conn.llen(KEY_DEAD).await?;

    let today_key = format!("processor:processed:{}", Utc::now().format("%Y%m%d"));
    let processed_today: i64 = conn.get(&today_key).await.unwrap_or(0);

    let speed = if elapsed_secs > 0.0 {
        (counters.processed.saturating_sub(previous_processed)) as f64 / elapsed_secs
    } else {
        0.0
    };

    let stats = GeneratorStats {
        processed: counters.processed,
        failed: counters.failed,
        retried: counters.retried,
        total_processing_time_ms: counters.total_processing_time_ms,
        pending,
        retry,
        dead,
        processed_today,
        speed,
    };

    let payload = serde_json::to_string(&stats).unwrap_or_default();
    conn.set::<_, _, ()>(KEY_STATUS, &payload).await?;
    conn.publish::<_, _, ()>(CHANNEL_REALTIME, &payload).await?;

    Ok(stats)
}

/// Bumps the day's processed counter and keeps its TTL fresh so the key
/// doesn't outlive the day it counts, per the ~2d retention the keys
/// contract gives it.
pub async fn incr_processed_today(conn: &mut MultiplexedConnection) -> Result<(), GeneratorError> {
    let today_key = format!("processor:processed:{}", Utc::now().format("%Y%m%d"));
    conn.incr::<_, _, ()>(&today_key, 1).await?;
    conn.expire::<_, ()>(&today_key, PROCESSED_TODAY_TTL_SECS).await?;
    Ok(())
}
