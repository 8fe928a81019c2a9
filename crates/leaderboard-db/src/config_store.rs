//! Leaderboard configuration persistence (`leaderboard_config`).
//!
//! Rows are keyed by `(safe_id, category)`, the same key the rank tables
//! and fast-store keys use, so two tenant spellings that share a safe id
//! (`game.one`, `game-one`) also share one configuration. The `tenant`
//! column keeps the spelling given at creation.

use chrono::{DateTime, Utc};
use leaderboard_types::{LeaderboardConfig, LeaderboardKey, TenantId};
use sqlx::PgPool;

use crate::error::DbError;

const SELECT_COLUMNS: &str = "tenant, category, name, sort, update_policy, cap, reset_schedule, \
     enabled, last_reset_at, created_at, updated_at";

/// Operations on the `leaderboard_config` table.
pub struct ConfigStore<'a> {
    pool: &'a PgPool,
}

impl<'a> ConfigStore<'a> {
    /// Create a new config store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load one configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    /// Returns [`DbError::InvalidData`] if the stored row cannot be decoded.
    pub async fn get(&self, key: &LeaderboardKey) -> Result<Option<LeaderboardConfig>, DbError> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM leaderboard_config WHERE safe_id = $1 AND category = $2");
        let row = sqlx::query_as::<_, ConfigRow>(&sql)
            .bind(key.tenant.safe_id())
            .bind(&key.category)
            .fetch_optional(self.pool)
            .await?;
        row.map(LeaderboardConfig::try_from).transpose()
    }

    /// Every configuration of one tenant, ordered by category.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a row cannot be decoded.
    pub async fn list_for_tenant(&self, tenant: &TenantId) -> Result<Vec<LeaderboardConfig>, DbError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM leaderboard_config WHERE safe_id = $1 ORDER BY category"
        );
        let rows = sqlx::query_as::<_, ConfigRow>(&sql)
            .bind(tenant.safe_id())
            .fetch_all(self.pool)
            .await?;
        rows.into_iter().map(LeaderboardConfig::try_from).collect()
    }

    /// Every enabled configuration. Rows that fail to decode are skipped
    /// with a warning so one bad row cannot stall the reset scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn list_enabled(&self) -> Result<Vec<LeaderboardConfig>, DbError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM leaderboard_config WHERE enabled ORDER BY safe_id, category"
        );
        let rows = sqlx::query_as::<_, ConfigRow>(&sql)
            .fetch_all(self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let (tenant, category) = (row.tenant.clone(), row.category.clone());
                LeaderboardConfig::try_from(row)
                    .map_err(|e| {
                        tracing::warn!(tenant, category, error = %e, "Skipping undecodable config row");
                    })
                    .ok()
            })
            .collect())
    }

    /// Insert a configuration. Returns `false` when the key already exists,
    /// including under another tenant spelling with the same safe id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn insert(&self, config: &LeaderboardConfig) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"INSERT INTO leaderboard_config
                (tenant, category, name, sort, update_policy, cap, reset_schedule, enabled, last_reset_at, created_at, updated_at, safe_id)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
              ON CONFLICT (safe_id, category) DO NOTHING",
        )
        .bind(config.tenant.as_str())
        .bind(&config.category)
        .bind(&config.name)
        .bind(config.sort.as_str())
        .bind(config.update_policy.as_str())
        .bind(cap_to_db(config.cap))
        .bind(config.reset_schedule.to_string())
        .bind(config.enabled)
        .bind(config.last_reset_at)
        .bind(config.created_at)
        .bind(config.updated_at)
        .bind(config.tenant.safe_id())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the mutable fields of a configuration. `last_reset_at` is
    /// owned by [`ConfigStore::mark_reset`] and left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn update(&self, config: &LeaderboardConfig) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE leaderboard_config
              SET name = $3, sort = $4, update_policy = $5, cap = $6,
                  reset_schedule = $7, enabled = $8, updated_at = $9
              WHERE safe_id = $1 AND category = $2",
        )
        .bind(config.tenant.safe_id())
        .bind(&config.category)
        .bind(&config.name)
        .bind(config.sort.as_str())
        .bind(config.update_policy.as_str())
        .bind(cap_to_db(config.cap))
        .bind(config.reset_schedule.to_string())
        .bind(config.enabled)
        .bind(config.updated_at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn delete(&self, key: &LeaderboardKey) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM leaderboard_config WHERE safe_id = $1 AND category = $2")
                .bind(key.tenant.safe_id())
                .bind(&key.category)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-set `last_reset_at` from `previous` to `boundary`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn mark_reset(
        &self,
        key: &LeaderboardKey,
        previous: Option<DateTime<Utc>>,
        boundary: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE leaderboard_config
              SET last_reset_at = $3
              WHERE safe_id = $1 AND category = $2
                AND last_reset_at IS NOT DISTINCT FROM $4",
        )
        .bind(key.tenant.safe_id())
        .bind(&key.category)
        .bind(boundary)
        .bind(previous)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Put `last_reset_at` back to `previous` if it still holds `boundary`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn restore_reset(
        &self,
        key: &LeaderboardKey,
        boundary: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE leaderboard_config
              SET last_reset_at = $4
              WHERE safe_id = $1 AND category = $2 AND last_reset_at = $3",
        )
        .bind(key.tenant.safe_id())
        .bind(&key.category)
        .bind(boundary)
        .bind(previous)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn cap_to_db(cap: u32) -> i32 {
    i32::try_from(cap).unwrap_or(i32::MAX)
}

/// Raw row of the `leaderboard_config` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfigRow {
    /// Tenant identifier as given at creation.
    pub tenant: String,
    /// Category.
    pub category: String,
    /// Display name.
    pub name: String,
    /// `asc` or `desc`.
    pub sort: String,
    /// `max`, `latest`, or `sum`.
    pub update_policy: String,
    /// Entry cap.
    pub cap: i32,
    /// Schedule keyword or cron expression.
    pub reset_schedule: String,
    /// Whether submissions are accepted.
    pub enabled: bool,
    /// Most recent reset boundary.
    pub last_reset_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ConfigRow> for LeaderboardConfig {
    type Error = DbError;

    fn try_from(row: ConfigRow) -> Result<Self, Self::Error> {
        let label = format!("{}/{}", row.tenant, row.category);
        let invalid =
            |e: &dyn std::fmt::Display| DbError::InvalidData(format!("leaderboard_config {label}: {e}"));
        Ok(Self {
            tenant: TenantId::parse(&row.tenant).map_err(|e| invalid(&e))?,
            sort: row.sort.parse().map_err(|e| invalid(&e))?,
            update_policy: row.update_policy.parse().map_err(|e| invalid(&e))?,
            cap: u32::try_from(row.cap).map_err(|e| invalid(&e))?,
            reset_schedule: row.reset_schedule.parse().map_err(|e| invalid(&e))?,
            category: row.category,
            name: row.name,
            enabled: row.enabled,
            last_reset_at: row.last_reset_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use leaderboard_types::{ResetSchedule, SortDirection, UpdatePolicy};

    fn row() -> ConfigRow {
        let now = Utc::now();
        ConfigRow {
            tenant: "game.one".to_owned(),
            category: "weekly".to_owned(),
            name: "Weekly".to_owned(),
            sort: "asc".to_owned(),
            update_policy: "sum".to_owned(),
            cap: 50,
            reset_schedule: "0 0 * * 1".to_owned(),
            enabled: true,
            last_reset_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_decodes_into_config() {
        let config = LeaderboardConfig::try_from(row()).unwrap();
        assert_eq!(config.tenant.safe_id(), "game_one");
        assert_eq!(config.sort, SortDirection::Asc);
        assert_eq!(config.update_policy, UpdatePolicy::Sum);
        assert_eq!(config.cap, 50);
        assert!(matches!(config.reset_schedule, ResetSchedule::Custom(_)));
    }

    #[test]
    fn bad_enum_or_cap_is_invalid_data() {
        let mut bad = row();
        bad.sort = "sideways".to_owned();
        assert!(matches!(
            LeaderboardConfig::try_from(bad),
            Err(DbError::InvalidData(_))
        ));

        let mut negative = row();
        negative.cap = -1;
        assert!(matches!(
            LeaderboardConfig::try_from(negative),
            Err(DbError::InvalidData(_))
        ));
    }
}
