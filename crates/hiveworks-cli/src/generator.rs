use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hiveworks_generator::{PipelineConfig, SharedCounters, Worker, WorkerCounters};

use crate::context::AppContext;

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const COMMAND_CHANNEL: &str = "processor:commands";

/// Owns the content-generator worker pool: spawns `worker_count` workers
/// against the shared `pending:articles` queue, republishes an aggregate
/// stats snapshot on a timer, and restarts the pool when a
/// `processor:commands` lifecycle message asks for it.
pub struct GeneratorManager {
    ctx: Arc<AppContext>,
}

impl GeneratorManager {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut pool = self.spawn_pool(self.current_config().await).await;

        match self.ctx.redis_client.get_async_pubsub().await {
            Ok(mut pubsub) => {
                if let Err(e) = pubsub.subscribe(COMMAND_CHANNEL).await {
                    warn!(error = %e, "generator command subscribe failed");
                }
                let mut stream = pubsub.on_message();
                let mut ticker = tokio::time::interval(STATS_INTERVAL);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            pool.cancel.cancel();
                            pool.join().await;
                            return;
                        }
                        _ = ticker.tick() => {
                            pool.publish_stats(&self.ctx).await;
                        }
                        msg = stream.next() => {
                            let Some(msg) = msg else { continue };
                            let Ok(payload) = msg.get_payload::<String>() else { continue };
                            if self.handle_lifecycle(&payload, &mut pool).await {
                                info!("generator pool restarted by lifecycle command");
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "generator command pub/sub unavailable, lifecycle commands disabled");
                let mut ticker = tokio::time::interval(STATS_INTERVAL);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            pool.cancel.cancel();
                            pool.join().await;
                            return;
                        }
                        _ = ticker.tick() => {
                            pool.publish_stats(&self.ctx).await;
                        }
                    }
                }
            }
        }
    }

    async fn current_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            batch_size: self.ctx.config.generator_batch_size,
            retry_max: self.ctx.config.generator_retry_max,
            ..PipelineConfig::default()
        };
        if let Ok(Some(v)) = self.ctx.settings.get("generator_batch_size").await {
            if let Ok(parsed) = v.parse() {
                config.batch_size = parsed;
            }
        }
        config
    }

    async fn spawn_pool(&self, config: PipelineConfig) -> WorkerPool {
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.ctx.config.generator_worker_count);
        let mut shared = Vec::with_capacity(self.ctx.config.generator_worker_count);

        for _ in 0..self.ctx.config.generator_worker_count {
            let mut worker = Worker::new(self.ctx.redis_conn.clone(), self.ctx.content.clone(), config.clone());
            let counters = worker.shared_counters();
            shared.push(counters);

            let worker_cancel = cancel.clone();
            handles.push(tokio::spawn(async move { worker.run(&worker_cancel).await }));
        }

        info!(worker_count = handles.len(), "generator pool started");
        WorkerPool {
            cancel,
            handles,
            shared,
            previous_processed: 0,
            last_tick: Instant::now(),
        }
    }

    /// Returns `true` if the pool was restarted.
    async fn handle_lifecycle(&self, payload: &str, pool: &mut WorkerPool) -> bool {
        let action = serde_json::from_str::<serde_json::Value>(payload)
            .ok()
            .and_then(|v| v.get("action").and_then(|a| a.as_str().map(str::to_string)))
            .unwrap_or_default();

        match action.as_str() {
            "stop" => {
                pool.cancel.cancel();
                pool.join().await;
                false
            }
            "start" | "reload_config" => {
                pool.cancel.cancel();
                pool.join().await;
                *pool = self.spawn_pool(self.current_config().await).await;
                true
            }
            _ => {
                warn!(action = %action, "unrecognized processor lifecycle action");
                false
            }
        }
    }
}

struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<WorkerCounters>>,
    shared: Vec<Arc<SharedCounters>>,
    previous_processed: u64,
    /// Start of the current stats interval, reset on every publish so
    /// `speed` reflects the last tick's throughput, not the pool's
    /// cumulative lifetime.
    last_tick: Instant,
}

impl WorkerPool {
    async fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    async fn publish_stats(&mut self, ctx: &AppContext) {
        let aggregate = self
            .shared
            .iter()
            .map(|s| s.snapshot())
            .fold(WorkerCounters::default(), |mut acc, c| {
                acc += c;
                acc
            });

        let mut conn = ctx.redis_conn.clone();
        let elapsed = self.last_tick.elapsed().as_secs_f64();
        match hiveworks_generator::stats::publish(&mut conn, aggregate, self.previous_processed, elapsed).await {
            Ok(_) => {}
            Err(e) => warn!(error = %e, "generator stats publish failed"),
        }
        self.previous_processed = aggregate.processed;
        self.last_tick = Instant::now();
    }
}
