use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use tokio_util::sync::CancellationToken;

use hiveworks_fetch::HttpFetcher;
use hiveworks_spider::SpiderRegistry;
use hiveworks_store::{ContentStore, FailedRequestStore, ProjectStore, SettingsStore};

use crate::config::Config;

/// Everything a command handler or run flow needs: connections, stores,
/// the spider registry, and the registry of in-flight crawl tasks keyed by
/// `(project_id, is_test)` so `run`/`test`/`stop` can find and cancel the
/// right one.
pub struct AppContext {
    pub config: Config,
    pub redis_client: redis::Client,
    pub redis_conn: MultiplexedConnection,
    pub projects: ProjectStore,
    pub content: ContentStore,
    pub failed_requests: FailedRequestStore,
    pub settings: SettingsStore,
    pub registry: SpiderRegistry,
    pub fetcher: Arc<HttpFetcher>,
    pub tasks: DashMap<(i64, bool), CancellationToken>,
    /// Cancelled to bring the whole process down, either from ctrl_c or a
    /// `restart` command.
    pub shutdown: CancellationToken,
    /// Set when a `restart` command fires, so `main` can exit non-zero and
    /// let the process supervisor relaunch it.
    pub restart_requested: AtomicBool,
}

impl AppContext {
    pub async fn connect(config: Config, registry: SpiderRegistry) -> anyhow::Result<Arc<Self>> {
        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis_conn = redis_client.get_multiplexed_tokio_connection().await?;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        hiveworks_store::run_migrations(&pool).await?;

        let proxy = match &config.proxy_url {
            Some(uri) => Some(hiveworks_fetch::ProxyConfig::parse(uri.clone())?),
            None => None,
        };
        let retry = hiveworks_fetch::RetryPolicy {
            max_retries: config.fetch_max_retries,
            ..hiveworks_fetch::RetryPolicy::default()
        };
        let fetcher = Arc::new(HttpFetcher::with_proxy(retry, proxy)?);

        Ok(Arc::new(Self {
            config,
            redis_client,
            redis_conn,
            projects: ProjectStore::new(pool.clone()),
            content: ContentStore::new(pool.clone()),
            failed_requests: FailedRequestStore::new(pool.clone()),
            settings: SettingsStore::new(pool),
            registry,
            fetcher,
            tasks: DashMap::new(),
            shutdown: CancellationToken::new(),
            restart_requested: AtomicBool::new(false),
        }))
    }
}
