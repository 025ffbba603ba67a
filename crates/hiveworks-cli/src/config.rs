use clap::Parser;

/// Process-wide configuration: Redis/Postgres endpoints and the tunables
/// for the worker pool, content generator, and scheduler. Every field has
/// an env var fallback so the same binary runs unmodified under a process
/// supervisor or a plain shell.
#[derive(Parser, Debug, Clone)]
#[command(name = "hiveworks-cli")]
#[command(about = "Crawl-and-process worker: command listener, run flow, generator pipeline, scheduler")]
pub struct Config {
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/hiveworks")]
    pub database_url: String,

    #[arg(long, env = "CRAWL_CONCURRENCY", default_value = "4")]
    pub default_concurrency: usize,

    #[arg(long, env = "GENERATOR_WORKER_COUNT", default_value = "4")]
    pub generator_worker_count: usize,

    #[arg(long, env = "GENERATOR_BATCH_SIZE", default_value = "50")]
    pub generator_batch_size: usize,

    #[arg(long, env = "GENERATOR_RETRY_MAX", default_value = "3")]
    pub generator_retry_max: u32,

    #[arg(long, env = "FETCH_MAX_RETRIES", default_value = "3")]
    pub fetch_max_retries: u32,

    #[arg(long, env = "HTTP_PROXY_URL")]
    pub proxy_url: Option<String>,

    #[arg(long, env = "ENABLE_SCHEDULER", default_value = "true")]
    pub enable_scheduler: bool,
}
