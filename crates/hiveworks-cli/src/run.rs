use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hiveworks_queue::QueueState;
use hiveworks_store::{ProjectRow, RunSummary};
use hiveworks_types::{ItemKind, RunnerEvent};
use hiveworks_workers::{Consumer, ConsumerConfig};

use crate::context::AppContext;

fn log_channel(project_id: i64, is_test: bool) -> String {
    if is_test {
        format!("spider:logs:test_{project_id}")
    } else {
        format!("spider:logs:project_{project_id}")
    }
}

async fn publish(ctx: &AppContext, channel: &str, payload: serde_json::Value) {
    let mut conn = ctx.redis_conn.clone();
    let _: Result<(), _> = conn.publish(channel, payload.to_string()).await;
}

/// Drives one `run`/`test` command end to end: loads the project, resolves
/// its spider, runs the consumer to completion, routes every emitted item,
/// and — for a live run — records the terminal outcome on the project row.
/// Mirrors the teacher's "load, build, stream, record" run-flow shape.
pub async fn run_project(
    ctx: Arc<AppContext>,
    project_id: i64,
    is_test: bool,
    max_items: Option<i64>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let channel = log_channel(project_id, is_test);

    let project = match ctx.projects.get(project_id).await {
        Ok(p) => p,
        Err(e) => {
            warn!(project_id, error = %e, "run flow: failed to load project");
            return;
        }
    };

    let spider = match ctx.registry.resolve(&project.entry_file) {
        Ok(s) => s,
        Err(e) => {
            warn!(project_id, error = %e, "run flow: spider resolution failed");
            if !is_test {
                record_terminal(&ctx, project_id, 0, started, Some(e.to_string())).await;
            }
            return;
        }
    };

    if !is_test {
        if let Err(e) = ctx.projects.mark_running(project_id).await {
            warn!(project_id, error = %e, "failed to mark project running");
        }
    }

    let pre_run_count = if is_test {
        0
    } else {
        ctx.projects
            .count_articles_for_source(project_id)
            .await
            .unwrap_or(0)
    };

    let concurrency = spider
        .concurrency_override()
        .unwrap_or_else(|| project.concurrency.max(1) as usize);
    let consumer_config = ConsumerConfig {
        concurrency,
        max_items,
    };

    let consumer = Consumer::new(
        ctx.redis_conn.clone(),
        project_id,
        is_test,
        spider,
        ctx.fetcher.clone(),
        consumer_config,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();

    let router_ctx = ctx.clone();
    let router_project = project.clone();
    let router_channel = channel.clone();
    let router = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            route_event(&router_ctx, &router_project, is_test, event, &router_channel).await;
        }
    });

    let final_state = consumer.run(tx, cancel).await;
    let _ = router.await;

    ctx.tasks.remove(&(project_id, is_test));

    info!(project_id, is_test, state = %final_state.as_str(), "crawl run finished");

    if is_test {
        publish(
            &ctx,
            &channel,
            serde_json::json!({"type": "end", "project_id": project_id, "state": final_state.as_str()}),
        )
        .await;
        return;
    }

    let post_run_count = ctx
        .projects
        .count_articles_for_source(project_id)
        .await
        .unwrap_or(pre_run_count);
    let delta = (post_run_count - pre_run_count).max(0);

    let error = match final_state {
        QueueState::Completed => None,
        _ => None, // stopped/cancelled returns to idle per the run state machine, not error
    };
    record_terminal(&ctx, project_id, delta, started, error).await;
}

async fn record_terminal(
    ctx: &AppContext,
    project_id: i64,
    last_run_items: i64,
    started: Instant,
    last_error: Option<String>,
) {
    let status = if last_error.is_some() { "error" } else { "idle" };
    let summary = RunSummary {
        status: status.to_string(),
        last_run_items,
        last_run_duration: started.elapsed().as_secs_f64(),
        last_error,
    };
    if let Err(e) = ctx.projects.record_run(project_id, summary).await {
        warn!(project_id, error = %e, "failed to record run summary");
    }
    publish(
        ctx,
        &format!("spider:stats:project_{project_id}"),
        serde_json::json!({
            "type": "stats",
            "project_id": project_id,
            "items_count": last_run_items,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )
    .await;
}

async fn route_event(
    ctx: &AppContext,
    project: &ProjectRow,
    is_test: bool,
    event: RunnerEvent,
    channel: &str,
) {
    match event {
        RunnerEvent::Item(item) => {
            let type_name = item.kind.type_name();
            if type_name != project.crawl_type {
                warn!(
                    project_id = project.id,
                    expected = %project.crawl_type,
                    got = type_name,
                    "item type mismatch, discarding"
                );
                return;
            }

            if is_test {
                publish(
                    ctx,
                    channel,
                    serde_json::json!({"type": "item", "project_id": project.id, "item": item}),
                )
                .await;
                return;
            }

            match item.kind {
                ItemKind::Keywords { keywords } => {
                    if let Err(e) = ctx.content.insert_keywords_bulk(project.output_group_id, &keywords).await
                    {
                        warn!(error = %e, "keyword insert failed");
                    }
                }
                ItemKind::Images { urls } => {
                    let fresh = filter_new_images(ctx, project.output_group_id, urls).await;
                    if fresh.is_empty() {
                        return;
                    }
                    match ctx.content.insert_images_bulk(project.output_group_id, &fresh).await {
                        Ok(_) => mark_images_seen(ctx, project.output_group_id, &fresh).await,
                        Err(e) => warn!(error = %e, "image insert failed"),
                    }
                }
                ItemKind::Article {
                    source_url,
                    title,
                    content,
                } => {
                    match ctx
                        .content
                        .insert_article(project.id, project.output_group_id, &source_url, &title, &content)
                        .await
                    {
                        Ok(Some(id)) => {
                            let mut conn = ctx.redis_conn.clone();
                            let _: Result<(), _> = conn.rpush("pending:articles", id).await;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "article insert failed"),
                    }
                }
            }

            bump_stats_and_publish(ctx, project.id, is_test).await;
        }
        RunnerEvent::Failed(sentinel) => {
            if let Err(e) = ctx
                .failed_requests
                .save(project.id, &sentinel.request, &sentinel.error)
                .await
            {
                warn!(error = %e, "failed to persist failed request");
            }
        }
    }
}

async fn filter_new_images(ctx: &AppContext, group_id: i64, urls: Vec<String>) -> Vec<String> {
    let key = format!("dedup:images:{group_id}");
    let mut conn = ctx.redis_conn.clone();
    let mut fresh = Vec::with_capacity(urls.len());
    for url in urls {
        let seen: bool = conn.sismember(&key, &url).await.unwrap_or(false);
        if !seen {
            fresh.push(url);
        }
    }
    fresh
}

async fn mark_images_seen(ctx: &AppContext, group_id: i64, urls: &[String]) {
    let key = format!("dedup:images:{group_id}");
    let mut conn = ctx.redis_conn.clone();
    let _: Result<(), _> = conn.sadd(&key, urls).await;
}

async fn bump_stats_and_publish(ctx: &AppContext, project_id: i64, is_test: bool) {
    let prefix = if is_test { "test_spider" } else { "spider" };
    let stats_key = format!("{prefix}:{project_id}:stats");
    let mut conn = ctx.redis_conn.clone();
    let items_count: i64 = conn.hincr(&stats_key, "items", 1).await.unwrap_or(0);

    publish(
        ctx,
        &log_channel(project_id, is_test),
        serde_json::json!({
            "type": "stats",
            "project_id": project_id,
            "items_count": items_count,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )
    .await;
}
