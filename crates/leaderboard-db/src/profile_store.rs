//! Per-tenant profile tables (`player_<safeId>`).
//!
//! Profiles are owned by the profile subsystem. The leaderboard only reads
//! them, in one batched query per projection.

use std::collections::HashMap;

use leaderboard_types::TenantId;
use sqlx::PgPool;

use crate::error::DbError;
use crate::postgres::classify;

/// Operations on the `player_<safeId>` tables.
pub struct ProfileStore<'a> {
    pool: &'a PgPool,
}

impl<'a> ProfileStore<'a> {
    /// Create a new profile store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create the tenant's profile table if missing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the DDL fails.
    pub async fn provision(&self, tenant: &TenantId) -> Result<(), DbError> {
        let table = tenant.profile_table();
        let sql = format!(
            r"CREATE TABLE IF NOT EXISTS {table} (
                player_id   VARCHAR(100) PRIMARY KEY,
                data        TEXT NOT NULL DEFAULT '{{}}',
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"
        );
        sqlx::query(&sql).execute(self.pool).await?;
        tracing::info!(tenant = %tenant, table, "Provisioned profile table");
        Ok(())
    }

    /// Profile documents for the given players, in one query.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingTable`] if the tenant was never provisioned.
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn load(
        &self,
        tenant: &TenantId,
        player_ids: &[String],
    ) -> Result<HashMap<String, String>, DbError> {
        if player_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let table = tenant.profile_table();
        let sql = format!("SELECT player_id, data FROM {table} WHERE player_id = ANY($1)");
        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(player_ids)
            .fetch_all(self.pool)
            .await
            .map_err(|e| classify(e, &table))?;
        Ok(rows.into_iter().collect())
    }

    /// Insert or replace a profile document.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingTable`] if the tenant was never provisioned.
    /// Returns [`DbError::Postgres`] if the upsert fails.
    pub async fn save(&self, tenant: &TenantId, player_id: &str, data: &str) -> Result<(), DbError> {
        let table = tenant.profile_table();
        let sql = format!(
            r"INSERT INTO {table} (player_id, data) VALUES ($1, $2)
              ON CONFLICT (player_id) DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()"
        );
        sqlx::query(&sql)
            .bind(player_id)
            .bind(data)
            .execute(self.pool)
            .await
            .map_err(|e| classify(e, &table))?;
        Ok(())
    }
}
