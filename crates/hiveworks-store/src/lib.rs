//! Durable state for the crawl-and-process worker: project/schedule rows,
//! the failed-request table, and the article/title/content/keyword/image
//! tables the generator pipeline and item router write to.

pub mod content;
pub mod error;
pub mod failed_request;
pub mod project;
pub mod settings;

pub use content::{ArticleRow, ContentStore};
pub use error::StoreError;
pub use failed_request::{
    FailedRequestPage, FailedRequestRow, FailedRequestStats, FailedRequestStatus,
    FailedRequestStore,
};
pub use project::{ProjectFileRow, ProjectRow, ProjectStore, RunSummary};
pub use settings::SettingsStore;

/// Applies `migrations/` to `pool`. Call once at process startup.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
