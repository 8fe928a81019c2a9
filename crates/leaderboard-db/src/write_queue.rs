//! Persisted durable-write queue (`leaderboard_write_queue`).
//!
//! Rows land here when an in-process writer lane is full (spill) or when a
//! task exhausts its retries (dead letter). Consumers claim due rows with
//! `FOR UPDATE SKIP LOCKED` and a lease, so a row is handled by exactly one
//! consumer at a time; an expired lease makes the row claimable again.
//! A row applied twice after a lease expiry is harmless: its `version`
//! column makes the second application a no-op.

use chrono::{DateTime, Utc};
use leaderboard_types::{TenantId, WriteOp, WriteTask};
use sqlx::PgPool;

use crate::error::DbError;
use crate::gateway::{QueueStatus, QueuedWrite};

/// Operations on the `leaderboard_write_queue` table.
pub struct WriteQueueStore<'a> {
    pool: &'a PgPool,
}

impl<'a> WriteQueueStore<'a> {
    /// Create a new queue store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Persist a task.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn enqueue(
        &self,
        task: &WriteTask,
        status: QueueStatus,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let (player, score, extra_data, enqueued_at) = match &task.op {
            WriteOp::Upsert {
                player_id,
                score,
                extra_data,
                at,
            } => (player_id.as_str(), *score, extra_data.as_deref(), *at),
            WriteOp::Delete { player_id } => (player_id.as_str(), 0, None, Utc::now()),
            WriteOp::Truncate => ("", 0, None, Utc::now()),
        };

        let row: (i64,) = sqlx::query_as(
            r"INSERT INTO leaderboard_write_queue
                (tenant, category, player, op, score, extra_data, enqueued_at, attempts, next_attempt_at, status, version)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
              RETURNING id",
        )
        .bind(task.tenant.as_str())
        .bind(&task.category)
        .bind(player)
        .bind(task.op.as_str())
        .bind(score)
        .bind(extra_data)
        .bind(enqueued_at)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .bind(next_attempt_at)
        .bind(status.as_str())
        .bind(task.version)
        .fetch_one(self.pool)
        .await?;

        tracing::debug!(
            id = row.0,
            tenant = %task.tenant,
            category = %task.category,
            op = task.op.as_str(),
            version = task.version,
            status = status.as_str(),
            "Persisted write task"
        );
        Ok(row.0)
    }

    /// Lease up to `limit` due pending rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the claim fails.
    /// Returns [`DbError::InvalidData`] if a claimed row cannot be decoded.
    pub async fn claim(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueuedWrite>, DbError> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r"UPDATE leaderboard_write_queue q
              SET claimed_until = $2
              WHERE q.id IN (
                  SELECT id FROM leaderboard_write_queue
                  WHERE status = 'pending'
                    AND next_attempt_at <= $1
                    AND (claimed_until IS NULL OR claimed_until <= $1)
                  ORDER BY id
                  LIMIT $3
                  FOR UPDATE SKIP LOCKED
              )
              RETURNING q.id, q.tenant, q.category, q.player, q.op, q.score, q.extra_data,
                        q.enqueued_at, q.attempts, q.version",
        )
        .bind(now)
        .bind(lease_until)
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await?;

        let mut claimed: Vec<QueuedWrite> = rows
            .into_iter()
            .map(QueuedWrite::try_from)
            .collect::<Result<_, _>>()?;
        claimed.sort_by_key(|w| w.id);
        Ok(claimed)
    }

    /// Delete a row whose task was applied.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn complete(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM leaderboard_write_queue WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Move a row to the dead-letter state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn bury(&self, id: i64, attempts: u32) -> Result<(), DbError> {
        sqlx::query(
            r"UPDATE leaderboard_write_queue
              SET status = 'dead', attempts = $2, claimed_until = NULL
              WHERE id = $1",
        )
        .bind(id)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Return every dead-letter row to the pending state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn requeue_dead(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query(
            r"UPDATE leaderboard_write_queue
              SET status = 'pending', attempts = 0, next_attempt_at = $1, claimed_until = NULL
              WHERE status = 'dead'",
        )
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Number of dead-letter rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count_dead(&self) -> Result<u64, DbError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM leaderboard_write_queue WHERE status = 'dead'")
                .fetch_one(self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Raw row of the `leaderboard_write_queue` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueRow {
    /// Row id.
    pub id: i64,
    /// Tenant identifier.
    pub tenant: String,
    /// Category.
    pub category: String,
    /// Target player (empty for truncates).
    pub player: String,
    /// `upsert`, `delete`, or `truncate`.
    pub op: String,
    /// Score for upserts.
    pub score: i64,
    /// Serialized `extraData` for upserts.
    pub extra_data: Option<String>,
    /// When the originating task was emitted.
    pub enqueued_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempts: i32,
    /// Fast-store version of the change.
    pub version: i64,
}

impl TryFrom<QueueRow> for QueuedWrite {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let tenant = TenantId::parse(&row.tenant)
            .map_err(|e| DbError::InvalidData(format!("write queue row {}: {e}", row.id)))?;
        let op = match row.op.as_str() {
            "upsert" => WriteOp::Upsert {
                player_id: row.player,
                score: row.score,
                extra_data: row.extra_data,
                at: row.enqueued_at,
            },
            "delete" => WriteOp::Delete {
                player_id: row.player,
            },
            "truncate" => WriteOp::Truncate,
            other => {
                return Err(DbError::InvalidData(format!(
                    "write queue row {}: unknown op {other:?}",
                    row.id
                )));
            }
        };
        Ok(Self {
            id: row.id,
            task: WriteTask {
                tenant,
                category: row.category,
                op,
                version: row.version,
            },
            attempts: u32::try_from(row.attempts).unwrap_or(0),
        })
    }
}
