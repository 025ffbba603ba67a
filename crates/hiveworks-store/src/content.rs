use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::instrument;

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArticleRow {
    pub id: i64,
    pub source_id: i64,
    pub group_id: i64,
    pub source_url: String,
    pub title: String,
    pub content: String,
}

/// `original_articles` / generated `titles` / `contents`, plus the
/// deduplicated `keywords` / `images` side tables. Titles and contents
/// share a per-group, monotonically increasing `batch_id` computed via an
/// atomic sequence table in the same transaction as the insert — see
/// `ContentStore::next_batch_id` for why this replaces the source's
/// `MAX(batch_id)+1` read-then-write.
#[derive(Clone)]
pub struct ContentStore {
    pool: PgPool,
}

impl ContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_article(
        &self,
        source_id: i64,
        group_id: i64,
        source_url: &str,
        title: &str,
        content: &str,
    ) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO original_articles (source_id, group_id, source_url, title, content) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT DO NOTHING \
             RETURNING id",
        )
        .bind(source_id)
        .bind(group_id)
        .bind(source_url)
        .bind(title)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<ArticleRow>, StoreError> {
        Ok(sqlx::query_as("SELECT * FROM original_articles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Atomically reserves the next `batch_id` for `group_id` by upserting
    /// a per-group counter row and returning its post-increment value,
    /// instead of the source's racy `SELECT MAX(batch_id)+1`.
    async fn next_batch_id(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        group_id: i64,
    ) -> Result<i64, StoreError> {
        let (batch_id,): (i64,) = sqlx::query_as(
            "INSERT INTO group_batch_sequence (group_id, next_batch_id) \
             VALUES ($1, 1) \
             ON CONFLICT (group_id) \
             DO UPDATE SET next_batch_id = group_batch_sequence.next_batch_id + 1 \
             RETURNING next_batch_id",
        )
        .bind(group_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(batch_id)
    }

    /// Bulk-inserts a title buffer under one new `batch_id`, ignoring rows
    /// that collide with an existing unique constraint.
    #[instrument(skip(self, titles))]
    pub async fn insert_titles_batch(
        &self,
        group_id: i64,
        titles: &[String],
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let batch_id = Self::next_batch_id(&mut tx, group_id).await?;

        sqlx::query(
            "INSERT INTO titles (group_id, batch_id, title) \
             SELECT $1, $2, t FROM UNNEST($3::text[]) AS t \
             ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(batch_id)
        .bind(titles)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(batch_id)
    }

    /// Per-row content inserts (to capture generated ids) sharing one
    /// `batch_id` reserved in the same transaction.
    #[instrument(skip(self, contents))]
    pub async fn insert_contents_batch(
        &self,
        group_id: i64,
        contents: &[String],
    ) -> Result<(i64, Vec<i64>), StoreError> {
        let mut tx = self.pool.begin().await?;
        let batch_id = Self::next_batch_id(&mut tx, group_id).await?;

        let mut ids = Vec::with_capacity(contents.len());
        for content in contents {
            let (id,): (i64,) = sqlx::query_as(
                "INSERT INTO contents (group_id, batch_id, content) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(group_id)
            .bind(batch_id)
            .bind(content)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok((batch_id, ids))
    }

    /// Dedup-inserts `(group_id, keyword)` pairs, ignoring duplicates at
    /// the unique-constraint level.
    pub async fn insert_keywords_bulk(
        &self,
        group_id: i64,
        keywords: &[String],
    ) -> Result<u64, StoreError> {
        if keywords.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO keywords (group_id, keyword) \
             SELECT $1, k FROM UNNEST($2::text[]) AS k \
             ON CONFLICT (group_id, keyword) DO NOTHING",
        )
        .bind(group_id)
        .bind(keywords)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Dedup-inserts `(group_id, url)` image rows, ignoring duplicates at
    /// the unique-constraint level. Callers that additionally pre-filter
    /// against a K/V membership set do so before calling this.
    pub async fn insert_images_bulk(
        &self,
        group_id: i64,
        urls: &[String],
    ) -> Result<u64, StoreError> {
        if urls.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO images (group_id, url) \
             SELECT $1, u FROM UNNEST($2::text[]) AS u \
             ON CONFLICT (group_id, url) DO NOTHING",
        )
        .bind(group_id)
        .bind(urls)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_row_roundtrips_through_serde() {
        let row = ArticleRow {
            id: 1,
            source_id: 2,
            group_id: 3,
            source_url: "https://example.com".into(),
            title: "t".into(),
            content: "c".into(),
        };
        let json = serde_json::to_string(&row).unwrap();
        let back: ArticleRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, row.id);
    }
}
