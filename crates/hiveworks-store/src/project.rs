use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::instrument;

use hiveworks_types::Schedule;

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub entry_file: String,
    pub config: serde_json::Value,
    pub concurrency: i32,
    pub crawl_type: String,
    pub output_group_id: i64,
    pub enabled: bool,
    pub status: String,
    pub schedule: Option<serde_json::Value>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_duration: Option<f64>,
    pub last_run_items: Option<i64>,
    pub last_error: Option<String>,
    pub total_runs: i64,
    pub total_items: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRow {
    /// Deserializes the `schedule` JSON column into the structured model,
    /// if present and well-formed.
    pub fn parsed_schedule(&self) -> Option<Schedule> {
        self.schedule
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectFileRow {
    pub project_id: i64,
    pub path: String,
    pub content: String,
    #[sqlx(rename = "type")]
    pub file_type: String,
}

/// Summary written back to `spider_projects` on every run's terminal path
/// (success, exception, or cancellation).
pub struct RunSummary {
    pub status: String,
    pub last_run_items: i64,
    pub last_run_duration: f64,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct ProjectStore {
    pool: PgPool,
}

impl ProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, project_id: i64) -> Result<ProjectRow, StoreError> {
        sqlx::query_as("SELECT * FROM spider_projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))
    }

    pub async fn list_files(&self, project_id: i64) -> Result<Vec<ProjectFileRow>, StoreError> {
        Ok(
            sqlx::query_as("SELECT * FROM spider_project_files WHERE project_id = $1")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Projects due for a scheduler check: enabled with a non-null schedule.
    pub async fn list_scheduled(&self) -> Result<Vec<ProjectRow>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT * FROM spider_projects WHERE enabled = true AND schedule IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Count of `original_articles` rows for `source_id`, used to compute a
    /// run's item delta robustly even under cancellation.
    pub async fn count_articles_for_source(&self, source_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM original_articles WHERE source_id = $1")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Marks a project `running` at the start of a live crawl. The
    /// scheduler trusts this column (not an in-memory flag) to decide
    /// whether a scheduled fire would double-run a project already
    /// in flight.
    pub async fn mark_running(&self, project_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE spider_projects SET status = 'running', updated_at = now() WHERE id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, summary))]
    pub async fn record_run(&self, project_id: i64, summary: RunSummary) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE spider_projects SET \
                status = $2, \
                last_run_at = now(), \
                last_run_duration = $3, \
                last_run_items = $4, \
                last_error = $5, \
                total_runs = total_runs + 1, \
                total_items = total_items + $4, \
                updated_at = now() \
             WHERE id = $1",
        )
        .bind(project_id)
        .bind(&summary.status)
        .bind(summary.last_run_duration)
        .bind(summary.last_run_items)
        .bind(&summary.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_schedule_fired(&self, project_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE spider_projects SET last_run_at = $2 WHERE id = $1")
            .bind(project_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
