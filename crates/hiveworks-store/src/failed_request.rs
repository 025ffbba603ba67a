use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, instrument};

use hiveworks_queue::RequestQueue;
use hiveworks_types::Request;

use crate::error::{truncate_bytes, StoreError, ERROR_MESSAGE_MAX_BYTES, URL_MAX_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedRequestStatus {
    Pending,
    Retried,
    Ignored,
}

impl FailedRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retried => "retried",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FailedRequestRow {
    pub id: i64,
    pub project_id: i64,
    pub url: String,
    pub method: String,
    pub callback: String,
    pub meta: serde_json::Value,
    pub error_message: String,
    pub retry_count: i32,
    pub failed_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct FailedRequestPage {
    pub total: i64,
    pub data: Vec<FailedRequestRow>,
}

#[derive(Debug, Serialize)]
pub struct FailedRequestStats {
    pub pending: i64,
    pub retried: i64,
    pub ignored: i64,
    pub total: i64,
}

/// Durable record of requests that exhausted their retry budget, mirroring
/// `spider_failed_requests`. Holds no queue connection of its own — callers
/// pass a [`RequestQueue`] scoped to the right project/namespace for
/// `retry_one`/`retry_all`.
pub struct FailedRequestStore {
    pool: PgPool,
}

impl FailedRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, request))]
    pub async fn save(
        &self,
        project_id: i64,
        request: &Request,
        error: &str,
    ) -> Result<i64, StoreError> {
        let url = truncate_bytes(&request.url, URL_MAX_BYTES);
        let error_message = truncate_bytes(error, ERROR_MESSAGE_MAX_BYTES);
        let meta = serde_json::Value::Object(request.meta.clone());

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO spider_failed_requests \
                (project_id, url, method, callback, meta, error_message, retry_count, failed_at, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), 'pending') \
             RETURNING id",
        )
        .bind(project_id)
        .bind(&url)
        .bind(request.method.as_str())
        .bind(&request.callback)
        .bind(&meta)
        .bind(&error_message)
        .bind(request.retry_count as i32)
        .fetch_one(&self.pool)
        .await?;

        info!(project_id, %url, "failed request persisted");
        Ok(id)
    }

    pub async fn list(
        &self,
        project_id: i64,
        page: i64,
        page_size: i64,
        status: Option<FailedRequestStatus>,
    ) -> Result<FailedRequestPage, StoreError> {
        let offset = (page.max(1) - 1) * page_size;

        let (total,): (i64,) = match status {
            Some(s) => {
                sqlx::query_as(
                    "SELECT count(*) FROM spider_failed_requests WHERE project_id = $1 AND status = $2",
                )
                .bind(project_id)
                .bind(s.as_str())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT count(*) FROM spider_failed_requests WHERE project_id = $1")
                    .bind(project_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        let data: Vec<FailedRequestRow> = match status {
            Some(s) => {
                sqlx::query_as(
                    "SELECT * FROM spider_failed_requests WHERE project_id = $1 AND status = $2 \
                     ORDER BY failed_at DESC LIMIT $3 OFFSET $4",
                )
                .bind(project_id)
                .bind(s.as_str())
                .bind(page_size)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM spider_failed_requests WHERE project_id = $1 \
                     ORDER BY failed_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(project_id)
                .bind(page_size)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(FailedRequestPage { total, data })
    }

    pub async fn get_one(&self, id: i64) -> Result<FailedRequestRow, StoreError> {
        sqlx::query_as("SELECT * FROM spider_failed_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("failed request {id}")))
    }

    /// Re-push the failed request with `retry_count` reset and
    /// `dont_filter=true` (bypasses the seen-set so a previously-completed
    /// fingerprint can be retried), then mark the row `retried`.
    pub async fn retry_one(&self, id: i64, queue: &mut RequestQueue) -> Result<(), StoreError> {
        let row = self.get_one(id).await?;
        let meta = row
            .meta
            .as_object()
            .cloned()
            .unwrap_or_default();

        let mut request = Request::new(row.url.clone())
            .with_callback(row.callback.clone())
            .with_meta(meta)
            .dont_filter();
        request.retry_count = 0;

        queue
            .push(&request)
            .await
            .map_err(|e| StoreError::NotFound(format!("queue push failed: {e}")))?;

        sqlx::query("UPDATE spider_failed_requests SET status = 'retried' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn retry_all(&self, project_id: i64, queue: &mut RequestQueue) -> Result<usize, StoreError> {
        let page = self
            .list(project_id, 1, i64::MAX, Some(FailedRequestStatus::Pending))
            .await?;
        let mut count = 0;
        for row in page.data {
            self.retry_one(row.id, queue).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn ignore(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE spider_failed_requests SET status = 'ignored' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM spider_failed_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_by_project(
        &self,
        project_id: i64,
        status: Option<FailedRequestStatus>,
    ) -> Result<u64, StoreError> {
        let result = match status {
            Some(s) => {
                sqlx::query("DELETE FROM spider_failed_requests WHERE project_id = $1 AND status = $2")
                    .bind(project_id)
                    .bind(s.as_str())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM spider_failed_requests WHERE project_id = $1")
                    .bind(project_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    pub async fn get_stats(&self, project_id: i64) -> Result<FailedRequestStats, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, count(*) FROM spider_failed_requests WHERE project_id = $1 GROUP BY status",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = FailedRequestStats {
            pending: 0,
            retried: 0,
            ignored: 0,
            total: 0,
        };
        for (status, count) in rows {
            match status.as_str() {
                "pending" => stats.pending = count,
                "retried" => stats.retried = count,
                "ignored" => stats.ignored = count,
                _ => {}
            }
            stats.total += count;
        }
        Ok(stats)
    }
}
