//! Per-tenant rank tables (`ranks_<safeId>`).
//!
//! One table per tenant holds every category's rows, keyed by
//! `(category, player_id)`. Tables are created by [`RankStore::provision`],
//! never implicitly by a write.
//!
//! Rows carry the version the fast store stamped on the write that produced
//! them. A write lands only if its version is newer than the row's and newer
//! than the category's truncate watermark (`leaderboard_watermark`), so
//! stale or replayed tasks can neither overwrite nor resurrect data. Deletes
//! leave a tombstone row (`deleted = TRUE`) that reads skip; truncates
//! remove tombstones along with live rows.

use chrono::{DateTime, Utc};
use leaderboard_types::{LeaderboardKey, SortDirection, TenantId};
use sqlx::PgPool;

use crate::error::DbError;
use crate::gateway::RankRow;
use crate::postgres::classify;

/// Watermark lookup for upserts: `$7` is the safe id, `$1` the category.
const WATERMARK: &str = "COALESCE((SELECT version FROM leaderboard_watermark \
     WHERE safe_id = $7 AND category = $1), 0)";

/// Watermark lookup for tombstones: `$4` is the safe id, `$1` the category.
const TOMBSTONE_WATERMARK: &str = "COALESCE((SELECT version FROM leaderboard_watermark \
     WHERE safe_id = $4 AND category = $1), 0)";

/// Operations on the `ranks_<safeId>` tables.
pub struct RankStore<'a> {
    pool: &'a PgPool,
}

impl<'a> RankStore<'a> {
    /// Create a new rank store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create the tenant's rank table and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any DDL statement fails.
    pub async fn provision(&self, tenant: &TenantId) -> Result<(), DbError> {
        let table = tenant.rank_table();
        let statements = [
            format!(
                r"CREATE TABLE IF NOT EXISTS {table} (
                    id          BIGSERIAL PRIMARY KEY,
                    category    VARCHAR(100) NOT NULL,
                    player_id   VARCHAR(100) NOT NULL,
                    score       BIGINT NOT NULL DEFAULT 0,
                    extra_data  TEXT,
                    created_at  TIMESTAMPTZ NOT NULL,
                    updated_at  TIMESTAMPTZ NOT NULL,
                    version     BIGINT NOT NULL DEFAULT 0,
                    deleted     BOOLEAN NOT NULL DEFAULT FALSE,
                    CONSTRAINT {table}_uk UNIQUE (category, player_id)
                )"
            ),
            format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 0"),
            format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS deleted BOOLEAN NOT NULL DEFAULT FALSE"
            ),
            format!("CREATE INDEX IF NOT EXISTS {table}_cs ON {table} (category, score)"),
            format!("CREATE INDEX IF NOT EXISTS {table}_upd ON {table} (updated_at)"),
        ];

        let mut tx = self.pool.begin().await?;
        for sql in &statements {
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!(tenant = %tenant, table, "Provisioned rank table");
        Ok(())
    }

    /// Insert or update one player's row if `version` is newer than both the
    /// row and the truncate watermark. `created_at` keeps its first value
    /// unless the row was a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingTable`] if the tenant was never provisioned.
    /// Returns [`DbError::Postgres`] if the upsert fails.
    pub async fn upsert(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        score: i64,
        extra_data: Option<&str>,
        now: DateTime<Utc>,
        version: i64,
    ) -> Result<(), DbError> {
        let table = key.tenant.rank_table();
        let sql = format!(
            r"INSERT INTO {table}
                  (category, player_id, score, extra_data, created_at, updated_at, version, deleted)
              SELECT $1, $2, $3, $4, $5, $5, $6, FALSE
              WHERE $6 > {WATERMARK}
              ON CONFLICT (category, player_id) DO UPDATE
              SET score = EXCLUDED.score,
                  extra_data = EXCLUDED.extra_data,
                  updated_at = EXCLUDED.updated_at,
                  created_at = CASE WHEN {table}.deleted
                                    THEN EXCLUDED.created_at
                                    ELSE {table}.created_at END,
                  version = EXCLUDED.version,
                  deleted = FALSE
              WHERE {table}.version < EXCLUDED.version"
        );
        sqlx::query(&sql)
            .bind(&key.category)
            .bind(player_id)
            .bind(score)
            .bind(extra_data)
            .bind(now)
            .bind(version)
            .bind(key.tenant.safe_id())
            .execute(self.pool)
            .await
            .map_err(|e| classify(e, &table))?;
        Ok(())
    }

    /// Replace one player's row with a tombstone if `version` is newer.
    /// Missing rows get a tombstone too, so a late upsert cannot revive them.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingTable`] if the tenant was never provisioned.
    /// Returns [`DbError::Postgres`] if the write fails.
    pub async fn delete(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        version: i64,
    ) -> Result<(), DbError> {
        let table = key.tenant.rank_table();
        let sql = format!(
            r"INSERT INTO {table}
                  (category, player_id, score, extra_data, created_at, updated_at, version, deleted)
              SELECT $1, $2, 0, NULL, NOW(), NOW(), $3, TRUE
              WHERE $3 > {TOMBSTONE_WATERMARK}
              ON CONFLICT (category, player_id) DO UPDATE
              SET score = 0,
                  extra_data = NULL,
                  updated_at = EXCLUDED.updated_at,
                  version = EXCLUDED.version,
                  deleted = TRUE
              WHERE {table}.version < EXCLUDED.version"
        );
        sqlx::query(&sql)
            .bind(&key.category)
            .bind(player_id)
            .bind(version)
            .bind(key.tenant.safe_id())
            .execute(self.pool)
            .await
            .map_err(|e| classify(e, &table))?;
        Ok(())
    }

    /// Raise the category's watermark to `version` and delete every row
    /// older than it. Returns the number of live rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingTable`] if the tenant was never provisioned.
    /// Returns [`DbError::Postgres`] if a statement fails.
    pub async fn truncate(&self, key: &LeaderboardKey, version: i64) -> Result<u64, DbError> {
        let table = key.tenant.rank_table();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"INSERT INTO leaderboard_watermark (safe_id, category, version)
              VALUES ($1, $2, $3)
              ON CONFLICT (safe_id, category) DO UPDATE
              SET version = GREATEST(leaderboard_watermark.version, EXCLUDED.version)",
        )
        .bind(key.tenant.safe_id())
        .bind(&key.category)
        .bind(version)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r"WITH gone AS (
                  DELETE FROM {table}
                  WHERE category = $1 AND version < $2
                  RETURNING deleted
              )
              SELECT COUNT(*) FILTER (WHERE NOT deleted) FROM gone"
        );
        let (removed,): (i64,) = sqlx::query_as(&sql)
            .bind(&key.category)
            .bind(version)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| classify(e, &table))?;
        tx.commit().await?;

        let removed = u64::try_from(removed).unwrap_or(0);
        tracing::debug!(leaderboard = %key, rows = removed, version, "Truncated rank rows");
        Ok(removed)
    }

    /// One page of rows ordered by score (ties by player id), plus the
    /// category's total row count.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingTable`] if the tenant was never provisioned.
    /// Returns [`DbError::Postgres`] if a query fails.
    pub async fn page(
        &self,
        key: &LeaderboardKey,
        sort: SortDirection,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<RankRow>, u64), DbError> {
        let table = key.tenant.rank_table();
        let direction = match sort {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let sql = format!(
            r"SELECT player_id, score, extra_data, created_at, updated_at
              FROM {table}
              WHERE category = $1 AND NOT deleted
              ORDER BY score {direction}, player_id ASC
              OFFSET $2 LIMIT $3"
        );
        let rows = sqlx::query_as::<_, RankRow>(&sql)
            .bind(&key.category)
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(self.pool)
            .await
            .map_err(|e| classify(e, &table))?;

        let count_sql = format!("SELECT COUNT(*) FROM {table} WHERE category = $1 AND NOT deleted");
        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(&key.category)
            .fetch_one(self.pool)
            .await
            .map_err(|e| classify(e, &table))?;

        Ok((rows, u64::try_from(total).unwrap_or(0)))
    }
}
