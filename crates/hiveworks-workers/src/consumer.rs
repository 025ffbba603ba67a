use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use hiveworks_fetch::{FetchOutcome, HttpFetcher};
use hiveworks_queue::{QueueState, RequestQueue};
use hiveworks_types::{CallbackYield, FailedSentinel, Request, Response, RunnerEvent, Spider};

const POLL_BACKOFF: Duration = Duration::from_millis(200);
const PAUSE_BACKOFF: Duration = Duration::from_millis(500);
const TERMINATION_CHECK_INTERVAL: Duration = Duration::from_millis(100);
const TERMINATION_CHECKS_REQUIRED: u32 = 3;

/// Tunables for one consumer run: worker pool size and an optional cap on
/// total queued/emitted items (production runs leave this unset; test runs
/// set it to bound a preview crawl).
#[derive(Debug, Clone, Copy)]
pub struct ConsumerConfig {
    pub concurrency: usize,
    pub max_items: Option<i64>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_items: None,
        }
    }
}

/// Shared flag: whether the spider's start-request generator is exhausted.
/// Polled by both the seeder and the termination monitor.
struct SeedState {
    exhausted: AtomicBool,
}

/// Drives one project's crawl: a pool of worker loops plus a lazy seeder
/// and a termination monitor, all coordinated through the shared queue.
pub struct Consumer {
    conn: MultiplexedConnection,
    project_id: i64,
    is_test: bool,
    spider: Arc<dyn Spider>,
    fetcher: Arc<HttpFetcher>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(
        conn: MultiplexedConnection,
        project_id: i64,
        is_test: bool,
        spider: Arc<dyn Spider>,
        fetcher: Arc<HttpFetcher>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            conn,
            project_id,
            is_test,
            spider,
            fetcher,
            config,
        }
    }

    fn new_queue(&self) -> RequestQueue {
        RequestQueue::new(self.conn.clone(), self.project_id, self.is_test)
    }

    /// Runs to completion: recovers stale `processing` entries, spawns the
    /// worker pool, seeder, and monitor, and waits for termination or the
    /// caller cancelling `cancel`. Returns the queue's terminal state.
    pub async fn run(
        self,
        output: mpsc::UnboundedSender<RunnerEvent>,
        cancel: CancellationToken,
    ) -> QueueState {
        let mut startup_queue = self.new_queue();
        if let Err(e) = startup_queue.recover_timeout().await {
            warn!(error = %e, "recover_timeout failed at consumer start");
        }
        if let Err(e) = startup_queue.set_state(QueueState::Running).await {
            warn!(error = %e, "failed to mark queue running");
        }
        drop(startup_queue);

        let seed_state = Arc::new(SeedState {
            exhausted: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(self.config.concurrency);
        for worker_id in 0..self.config.concurrency {
            let worker = WorkerLoop {
                queue: self.new_queue(),
                spider: self.spider.clone(),
                fetcher: self.fetcher.clone(),
                config: self.config,
                output: output.clone(),
                cancel: cancel.clone(),
                worker_id,
            };
            workers.push(tokio::spawn(worker.run()));
        }

        let seeder = tokio::spawn(run_seeder(
            self.new_queue(),
            self.spider.clone(),
            self.config,
            seed_state.clone(),
            cancel.clone(),
        ));

        let terminated_cleanly = run_monitor(self.new_queue(), seed_state, cancel.clone()).await;

        cancel.cancel();
        for worker in workers {
            let _ = worker.await;
        }
        let _ = seeder.await;

        let final_state = if terminated_cleanly {
            QueueState::Completed
        } else {
            QueueState::Stopped
        };
        let mut queue = self.new_queue();
        if let Err(e) = queue.set_state(final_state).await {
            warn!(error = %e, "failed to set terminal queue state");
        }
        final_state
    }
}

/// Whenever `pending` drops below `2 * concurrency`, pulls one request from
/// the spider's start-request generator and pushes it with `dont_filter`.
/// Stops early once `queued_count` reaches `max_items`, or once the
/// generator is exhausted.
async fn run_seeder(
    mut queue: RequestQueue,
    spider: Arc<dyn Spider>,
    config: ConsumerConfig,
    seed_state: Arc<SeedState>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        if let Some(max_items) = config.max_items {
            match queue.get_queued_count().await {
                Ok(count) if count >= max_items => {
                    seed_state.exhausted.store(true, Ordering::SeqCst);
                    return;
                }
                Err(e) => warn!(error = %e, "failed to read queued_count while seeding"),
                _ => {}
            }
        }

        let pending = match queue.get_pending_count().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to read pending count while seeding");
                sleep(POLL_BACKOFF).await;
                continue;
            }
        };

        if pending >= 2 * config.concurrency as i64 {
            sleep(POLL_BACKOFF).await;
            continue;
        }

        match spider.next_start_request().await {
            Some(mut request) => {
                request.dont_filter = true;
                if let Err(e) = queue.push(&request).await {
                    warn!(error = %e, "failed to push seed request");
                }
            }
            None => {
                seed_state.exhausted.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

/// Exits once `pending`/`processing` are both empty and the seeder is
/// exhausted, observed on three consecutive checks. Returns `true` on that
/// clean exit, `false` if `cancel` fired first.
async fn run_monitor(
    mut queue: RequestQueue,
    seed_state: Arc<SeedState>,
    cancel: CancellationToken,
) -> bool {
    let mut consecutive_idle = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(TERMINATION_CHECK_INTERVAL) => {}
        }

        let empty = queue.is_empty().await.unwrap_or(false);
        let exhausted = seed_state.exhausted.load(Ordering::SeqCst);

        if empty && exhausted {
            consecutive_idle += 1;
            if consecutive_idle >= TERMINATION_CHECKS_REQUIRED {
                return true;
            }
        } else {
            consecutive_idle = 0;
        }
    }
}

struct WorkerLoop {
    queue: RequestQueue,
    spider: Arc<dyn Spider>,
    fetcher: Arc<HttpFetcher>,
    config: ConsumerConfig,
    output: mpsc::UnboundedSender<RunnerEvent>,
    cancel: CancellationToken,
    worker_id: usize,
}

impl WorkerLoop {
    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let state = match self.queue.get_state().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(worker = self.worker_id, error = %e, "failed to read queue state");
                    sleep(POLL_BACKOFF).await;
                    continue;
                }
            };
            if state == QueueState::Stopped {
                return;
            }
            if state == QueueState::Paused {
                sleep(PAUSE_BACKOFF).await;
                continue;
            }

            let request = match self.queue.pop().await {
                Ok(Some(r)) => r,
                Ok(None) => {
                    sleep(POLL_BACKOFF).await;
                    continue;
                }
                Err(e) => {
                    warn!(worker = self.worker_id, error = %e, "pop failed");
                    sleep(POLL_BACKOFF).await;
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                if let Err(e) = self.queue.push(&request).await {
                    warn!(error = %e, "failed to push back in-flight request on cancel");
                }
                return;
            }

            let Some(request) = self.spider.download_midware(request).await else {
                continue;
            };

            if request.retry_count > 0 {
                let delay = request.backoff_delay();
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = self.cancel.cancelled() => {
                        if let Err(e) = self.queue.push(&request).await {
                            warn!(error = %e, "failed to push back during backoff cancel");
                        }
                        return;
                    }
                }
            }

            let outcome = self.fetcher.fetch(&request, &self.cancel).await;
            let fetched = match outcome {
                FetchOutcome::Response(r) => r,
                FetchOutcome::Failed(err) => {
                    self.handle_fetch_failure(request, err.to_string()).await;
                    continue;
                }
            };

            let response = Response::new(
                request.url.clone(),
                fetched.body,
                fetched.status,
                fetched.headers,
                request.clone(),
            );

            if !self.spider.validate(&request, &response).await {
                self.handle_fetch_failure(request, "validation failed".to_string()).await;
                continue;
            }

            let yields = match self.spider.dispatch(&request.callback, &request, &response).await {
                Ok(y) => y,
                Err(e) => {
                    self.handle_fetch_failure(request, e.to_string()).await;
                    continue;
                }
            };

            let item_cap_hit = self.forward_yields(yields).await;

            if let Err(e) = self.queue.complete(&request, true).await {
                warn!(error = %e, "failed to mark request complete");
            }

            if item_cap_hit {
                if let Err(e) = self.queue.set_state(QueueState::Stopped).await {
                    warn!(error = %e, "failed to stop queue at item cap");
                }
                return;
            }
        }
    }

    /// Pushes yielded requests and forwards yielded items, honoring
    /// `max_items` on each counter independently. Returns whether the item
    /// cap was crossed (the worker loop must stop the queue in that case).
    async fn forward_yields(&mut self, yields: Vec<CallbackYield>) -> bool {
        for yielded in yields {
            match yielded {
                CallbackYield::Request(follow_up) => {
                    let queued_count = match self.queue.incr_queued_count().await {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(error = %e, "failed to bump queued_count");
                            continue;
                        }
                    };
                    if let Some(max_items) = self.config.max_items {
                        if queued_count > max_items {
                            continue;
                        }
                    }
                    if let Err(e) = self.queue.push(&follow_up).await {
                        warn!(error = %e, "failed to push yielded request");
                    }
                }
                CallbackYield::Item(item) => {
                    let item_count = match self.queue.incr_item_count().await {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(error = %e, "failed to bump item_count");
                            continue;
                        }
                    };
                    if let Some(max_items) = self.config.max_items {
                        if item_count > max_items {
                            return true;
                        }
                    }
                    let _ = self.output.send(RunnerEvent::Item(item));
                }
            }
        }
        false
    }

    async fn handle_fetch_failure(&mut self, request: Request, error: String) {
        match self.queue.retry(&request).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.queue.complete(&request, false).await {
                    warn!(error = %e, "failed to mark failed request complete");
                }
                self.spider.failed_request(&request, &error).await;
                let _ = self.output.send(RunnerEvent::Failed(FailedSentinel { request, error }));
            }
            Err(e) => {
                warn!(error = %e, "retry() failed");
            }
        }
    }
}
