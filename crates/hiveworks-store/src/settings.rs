use sqlx::PgPool;

use crate::error::StoreError;

/// Flat `key -> (value, type)` store for admin-tunable globals (ad-keyword
/// list overrides, default batch sizes, …). `setting_type` is advisory —
/// callers decide how to parse `setting_value`.
pub struct SettingsStore {
    pool: PgPool,
}

impl SettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT setting_value FROM system_settings WHERE setting_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set(&self, key: &str, value: &str, setting_type: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_settings (setting_key, setting_value, setting_type) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (setting_key) \
             DO UPDATE SET setting_value = excluded.setting_value, setting_type = excluded.setting_type",
        )
        .bind(key)
        .bind(value)
        .bind(setting_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
