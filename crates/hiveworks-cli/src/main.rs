mod commands;
mod config;
mod context;
mod dispatcher;
mod generator;
mod run;
mod service;

use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::Config;
use context::AppContext;
use hiveworks_spider::SpiderRegistry;
use service::Service;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        redis_url = %config.redis_url,
        generator_worker_count = config.generator_worker_count,
        enable_scheduler = config.enable_scheduler,
        "starting hiveworks-cli"
    );

    // Spiders are registered by whatever binary embeds this crawl runtime;
    // none ship with the framework itself.
    let registry = SpiderRegistry::new();

    let ctx = AppContext::connect(config, registry).await?;
    let mut service = Service::new(ctx.clone());
    service.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl_c, shutting down");
        }
        _ = ctx.shutdown.cancelled() => {
            tracing::info!("shutdown requested by command");
        }
    }

    service.stop().await;

    if ctx.restart_requested.load(Ordering::SeqCst) {
        tracing::info!("exiting with restart status for process supervisor");
        std::process::exit(1);
    }

    Ok(())
}
