//! Durable-write worker.
//!
//! The engine hands every accepted change to [`DurableWriter::enqueue`]
//! and returns without waiting. Tasks are routed to one of N lanes by
//! hashing `(tenant, category)`, so the tasks of one leaderboard usually
//! apply in the order they were emitted. Spilled rows, expired leases,
//! other instances' sweepers, and dead-letter replays all break that order;
//! the durable store copes by applying a task only when its version is
//! newer than what the row already holds. Each lane applies its tasks one
//! by one:
//!
//! ```text
//!   enqueue ──► lane[hash(tenant, category)] ──► apply ──► done
//!      │ (lane full)                               │ (error)
//!      ▼                                           ▼
//!   leaderboard_write_queue ◄── sweeper      retry with backoff
//!      (pending)                                   │ (attempts used up)
//!                                                  ▼
//!                                   leaderboard_write_queue (dead) + alert
//! ```
//!
//! Dead letters are returned to the pending state at start-up, before any
//! new task is accepted, and on operator request.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use leaderboard_db::{DbError, DurableStore, QueueStatus, QueuedWrite};
use leaderboard_types::{WriteOp, WriteTask};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertCategory, AlertLog, AlertSeverity};
use crate::config::WriterConfig;
use crate::retry::RetryPolicy;

/// Rows claimed from the queue table per sweep.
const CLAIM_BATCH: u32 = 256;

/// A task in flight, with its queue row when it came from the table.
#[derive(Debug, Clone)]
struct Job {
    queue_id: Option<i64>,
    task: WriteTask,
    attempts: u32,
}

/// Counts tasks accepted but not yet settled (applied, parked, or spilled).
#[derive(Debug)]
struct InFlight {
    count: watch::Sender<usize>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            count: watch::Sender::new(0),
        }
    }

    fn begin(&self) {
        self.count.send_modify(|n| *n = n.saturating_add(1));
    }

    fn end(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

struct Shared {
    lanes: Vec<mpsc::Sender<Job>>,
    durable: Arc<dyn DurableStore>,
    alerts: AlertLog,
    retry: RetryPolicy,
    lease: TimeDelta,
    in_flight: InFlight,
}

impl Shared {
    fn lane_for(&self, task: &WriteTask) -> Option<&mpsc::Sender<Job>> {
        let mut hasher = DefaultHasher::new();
        task.tenant.safe_id().hash(&mut hasher);
        task.category.hash(&mut hasher);
        let lanes = u64::try_from(self.lanes.len()).ok()?;
        let index = usize::try_from(hasher.finish().checked_rem(lanes)?).ok()?;
        self.lanes.get(index)
    }

    /// Hand a job to its lane, waiting for room.
    async fn dispatch(&self, job: Job) {
        let Some(lane) = self.lane_for(&job.task) else {
            return;
        };
        self.in_flight.begin();
        if let Err(mpsc::error::SendError(job)) = lane.send(job).await {
            self.in_flight.end();
            tracing::warn!(queue_id = ?job.queue_id, "Writer lane closed, task left in queue");
        }
    }

    /// Claim due queue rows and hand them to their lanes.
    async fn sweep_once(&self) -> Result<usize, DbError> {
        let now = Utc::now();
        let lease_until = now.checked_add_signed(self.lease).unwrap_or(now);
        let claimed = self.durable.claim_writes(now, lease_until, CLAIM_BATCH).await?;
        let count = claimed.len();
        if count > 0 {
            tracing::debug!(count, "Claimed queued write tasks");
        }
        for QueuedWrite { id, task, attempts } in claimed {
            self.dispatch(Job {
                queue_id: Some(id),
                task,
                attempts,
            })
            .await;
        }
        Ok(count)
    }

    async fn spill(&self, job: Job) {
        let persisted = self
            .durable
            .enqueue_write(&job.task, QueueStatus::Pending, job.attempts, Utc::now())
            .await;
        match persisted {
            Ok(id) => {
                tracing::info!(queue_id = id, leaderboard = %job.task.key(), op = job.task.op.as_str(), "Lane full, spilled task to queue");
            }
            Err(e) => {
                self.alerts
                    .raise(
                        AlertSeverity::Critical,
                        AlertCategory::WriteQueue,
                        format!(
                            "could not spill {} task for {}: {e}",
                            job.task.op.as_str(),
                            job.task.key()
                        ),
                    )
                    .await;
            }
        }
        self.in_flight.end();
    }

    async fn process(&self, job: Job, cancel: &CancellationToken) {
        let mut attempts = job.attempts;
        loop {
            let err = match apply(self.durable.as_ref(), &job.task).await {
                Ok(()) => {
                    if let Some(id) = job.queue_id
                        && let Err(e) = self.durable.complete_write(id).await
                    {
                        tracing::warn!(queue_id = id, error = %e, "Applied task but could not delete its queue row");
                    }
                    return;
                }
                Err(e) => e,
            };

            attempts = attempts.saturating_add(1);
            if attempts >= self.retry.max_attempts() {
                self.park(&job, attempts, &err).await;
                return;
            }
            let delay = self.retry.delay_for(attempts.saturating_sub(1));
            tracing::warn!(
                leaderboard = %job.task.key(),
                op = job.task.op.as_str(),
                player = job.task.op.player_id().unwrap_or(""),
                attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Durable write failed, retrying"
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    self.persist_unfinished(&job, attempts).await;
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn park(&self, job: &Job, attempts: u32, err: &DbError) {
        let parked = match job.queue_id {
            Some(id) => self.durable.bury_write(id, attempts).await,
            None => self
                .durable
                .enqueue_write(&job.task, QueueStatus::Dead, attempts, Utc::now())
                .await
                .map(|_| ()),
        };
        let message = match parked {
            Ok(()) => format!(
                "{} task for {} parked as dead letter after {attempts} attempts: {err}",
                job.task.op.as_str(),
                job.task.key()
            ),
            Err(e) => format!(
                "{} task for {} failed {attempts} times ({err}) and could not be parked: {e}",
                job.task.op.as_str(),
                job.task.key()
            ),
        };
        self.alerts
            .raise(AlertSeverity::Critical, AlertCategory::DeadLetter, message)
            .await;
    }

    /// Keep a task that was interrupted by shutdown mid-retry.
    async fn persist_unfinished(&self, job: &Job, attempts: u32) {
        // Queue rows keep their lease and become claimable when it expires.
        if job.queue_id.is_some() {
            return;
        }
        if let Err(e) = self
            .durable
            .enqueue_write(&job.task, QueueStatus::Pending, attempts, Utc::now())
            .await
        {
            tracing::error!(leaderboard = %job.task.key(), error = %e, "Dropped unfinished write task at shutdown");
        }
    }
}

async fn apply(durable: &dyn DurableStore, task: &WriteTask) -> Result<(), DbError> {
    let key = task.key();
    match &task.op {
        WriteOp::Upsert {
            player_id,
            score,
            extra_data,
            at,
        } => {
            durable
                .upsert_rank(&key, player_id, *score, extra_data.as_deref(), *at, task.version)
                .await
        }
        WriteOp::Delete { player_id } => durable.delete_rank(&key, player_id, task.version).await,
        WriteOp::Truncate => durable.truncate_ranks(&key, task.version).await.map(|_| ()),
    }
}

/// Background applier of durable-store writes.
pub struct DurableWriter {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DurableWriter {
    /// Start the lanes and the sweeper.
    ///
    /// Dead letters are moved back to pending and every due queue row is
    /// handed to the lanes before this returns. Recovered tasks older than
    /// the durable rows they target are dropped by the version check.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the dead-letter requeue or the initial claim
    /// fails.
    pub async fn start(
        durable: Arc<dyn DurableStore>,
        alerts: AlertLog,
        config: &WriterConfig,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, DbError> {
        let revived = durable.requeue_dead_writes(Utc::now()).await?;
        if revived > 0 {
            tracing::info!(count = revived, "Requeued dead-letter write tasks");
        }

        let lane_count = config.lanes.max(1);
        let mut senders = Vec::with_capacity(lane_count);
        let mut receivers = Vec::with_capacity(lane_count);
        for _ in 0..lane_count {
            let (tx, rx) = mpsc::channel(config.lane_capacity.max(1));
            senders.push(tx);
            receivers.push(rx);
        }

        let shared = Arc::new(Shared {
            lanes: senders,
            durable,
            alerts,
            retry: config.retry_policy(),
            lease: TimeDelta::seconds(i64::try_from(config.claim_lease_secs).unwrap_or(i64::MAX)),
            in_flight: InFlight::new(),
        });

        let mut handles = Vec::with_capacity(lane_count.saturating_add(1));
        for (lane, rx) in receivers.into_iter().enumerate() {
            handles.push(tokio::spawn(run_lane(
                lane,
                rx,
                Arc::clone(&shared),
                cancel.clone(),
            )));
        }

        // Drain whatever is already due before accepting new work.
        while shared.sweep_once().await? >= usize::try_from(CLAIM_BATCH).unwrap_or(usize::MAX) {}

        handles.push(tokio::spawn(run_sweeper(
            Arc::clone(&shared),
            Duration::from_secs(config.sweep_interval_secs.max(1)),
            cancel.clone(),
        )));

        tracing::info!(lanes = lane_count, capacity = config.lane_capacity, "Durable writer started");
        Ok(Arc::new(Self {
            shared,
            cancel,
            tasks: Mutex::new(handles),
        }))
    }

    /// Queue a task without waiting for it to apply.
    ///
    /// When the task's lane is full the task is persisted to the queue
    /// table in the background and picked up by the sweeper.
    pub fn enqueue(&self, task: WriteTask) {
        let Some(lane) = self.shared.lane_for(&task) else {
            return;
        };
        let job = Job {
            queue_id: None,
            task,
            attempts: 0,
        };
        self.shared.in_flight.begin();
        match lane.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job)) => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { shared.spill(job).await });
            }
        }
    }

    /// Wait until every accepted task has settled and no queue row is due.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the queue table cannot be read.
    pub async fn flush(&self) -> Result<(), DbError> {
        loop {
            self.shared.in_flight.idle().await;
            if self.shared.sweep_once().await? == 0 {
                self.shared.in_flight.idle().await;
                return Ok(());
            }
        }
    }

    /// Return every dead letter to pending and dispatch it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the requeue or the claim fails.
    pub async fn replay_dead_letters(&self) -> Result<u64, DbError> {
        let revived = self.shared.durable.requeue_dead_writes(Utc::now()).await?;
        tracing::info!(count = revived, "Replaying dead-letter write tasks");
        if revived > 0 {
            self.shared.sweep_once().await?;
        }
        Ok(revived)
    }

    /// Number of parked tasks.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the queue table cannot be read.
    pub async fn dead_letters(&self) -> Result<u64, DbError> {
        self.shared.durable.count_dead_writes().await
    }

    /// Number of tasks accepted but not yet settled.
    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight.count.borrow()
    }

    /// Drain for up to `grace`, then stop the lanes and the sweeper.
    pub async fn shutdown(&self, grace: Duration) {
        if tokio::time::timeout(grace, self.shared.in_flight.idle()).await.is_err() {
            tracing::warn!(in_flight = self.in_flight(), "Writer did not drain before shutdown");
        }
        self.cancel.cancel();
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Writer task ended abnormally");
            }
        }
        tracing::info!("Durable writer stopped");
    }
}

async fn run_lane(
    lane: usize,
    mut rx: mpsc::Receiver<Job>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            () = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        shared.process(job, &cancel).await;
        shared.in_flight.end();
    }

    // Keep whatever is still buffered so it survives the restart.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        shared.persist_unfinished(&job, job.attempts).await;
        shared.in_flight.end();
    }
    tracing::debug!(lane, "Writer lane stopped");
}

async fn run_sweeper(shared: Arc<Shared>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = shared.sweep_once().await {
                    tracing::warn!(error = %e, "Write queue sweep failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use leaderboard_db::MemoryDurableStore;
    use leaderboard_types::{LeaderboardKey, TenantId};

    fn config(lanes: usize, capacity: usize) -> WriterConfig {
        WriterConfig {
            lanes,
            lane_capacity: capacity,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            max_attempts: 3,
            sweep_interval_secs: 1,
            claim_lease_secs: 30,
        }
    }

    async fn provisioned() -> (Arc<MemoryDurableStore>, LeaderboardKey) {
        let durable = Arc::new(MemoryDurableStore::new());
        let tenant = TenantId::parse("game").unwrap();
        durable.provision_tenant(&tenant).await.unwrap();
        (durable, LeaderboardKey::new(tenant, "daily").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_for_one_leaderboard_apply_in_order() {
        let (durable, key) = provisioned().await;
        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(4, 64), CancellationToken::new())
            .await
            .unwrap();

        let now = Utc::now();
        writer.enqueue(WriteTask::upsert(&key, "a", 10, None, now, 1));
        writer.enqueue(WriteTask::upsert(&key, "a", 20, None, now, 2));
        writer.enqueue(WriteTask::delete(&key, "a", 3));
        writer.enqueue(WriteTask::upsert(&key, "b", 5, Some(r#"{"k":1}"#.to_owned()), now, 4));
        writer.flush().await.unwrap();

        assert!(durable.rank_row(&key, "a").await.is_none());
        let b = durable.rank_row(&key, "b").await.unwrap();
        assert_eq!(b.score, 5);
        assert_eq!(b.extra_data.as_deref(), Some(r#"{"k":1}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (durable, key) = provisioned().await;
        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(1, 8), CancellationToken::new())
            .await
            .unwrap();

        durable.fail_next_writes(2);
        writer.enqueue(WriteTask::upsert(&key, "a", 42, None, Utc::now(), 1));
        writer.flush().await.unwrap();

        assert_eq!(durable.rank_row(&key, "a").await.unwrap().score, 42);
        assert_eq!(writer.dead_letters().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_tasks_are_parked_and_alerted() {
        let (durable, key) = provisioned().await;
        let alerts = AlertLog::new();
        let writer = DurableWriter::start(durable.clone(), alerts.clone(), &config(1, 8), CancellationToken::new())
            .await
            .unwrap();

        durable.fail_next_writes(3);
        writer.enqueue(WriteTask::upsert(&key, "a", 42, None, Utc::now(), 1));
        writer.flush().await.unwrap();

        assert!(durable.rank_row(&key, "a").await.is_none());
        assert_eq!(writer.dead_letters().await.unwrap(), 1);
        let raised = alerts.recent(10).await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised.first().unwrap().category, AlertCategory::DeadLetter);

        assert_eq!(writer.replay_dead_letters().await.unwrap(), 1);
        writer.flush().await.unwrap();
        assert_eq!(durable.rank_row(&key, "a").await.unwrap().score, 42);
        assert_eq!(durable.queue_len(QueueStatus::Dead).await, 0);
        assert_eq!(durable.queue_len(QueueStatus::Pending).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_letters_are_resumed_at_start() {
        let (durable, key) = provisioned().await;
        let task = WriteTask::upsert(&key, "z", 9, None, Utc::now(), 1);
        durable
            .enqueue_write(&task, QueueStatus::Dead, 10, Utc::now())
            .await
            .unwrap();

        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(2, 8), CancellationToken::new())
            .await
            .unwrap();
        writer.flush().await.unwrap();

        assert_eq!(durable.rank_row(&key, "z").await.unwrap().score, 9);
        assert_eq!(writer.dead_letters().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_lane_spills_to_the_queue_table() {
        let (durable, key) = provisioned().await;
        durable.set_latency(Duration::from_millis(50));
        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(1, 1), CancellationToken::new())
            .await
            .unwrap();

        let now = Utc::now();
        for (i, player) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            let score = i64::try_from(i).unwrap();
            writer.enqueue(WriteTask::upsert(&key, player, score, None, now, score + 1));
        }
        writer.flush().await.unwrap();

        assert_eq!(durable.rank_count(&key).await, 5);
        assert_eq!(durable.queue_len(QueueStatus::Pending).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spilled_task_cannot_overtake_a_newer_one() {
        let (durable, key) = provisioned().await;
        durable.set_latency(Duration::from_millis(50));
        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(1, 1), CancellationToken::new())
            .await
            .unwrap();

        let now = Utc::now();
        writer.enqueue(WriteTask::upsert(&key, "a", 1, None, now, 1));
        writer.enqueue(WriteTask::upsert(&key, "a", 2, None, now, 2));
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer.enqueue(WriteTask::upsert(&key, "a", 3, None, now, 3));
        writer.flush().await.unwrap();

        assert_eq!(durable.rank_row(&key, "a").await.unwrap().score, 3);
        assert_eq!(durable.queue_len(QueueStatus::Pending).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_dead_letter_does_not_overwrite_newer_row() {
        let (durable, key) = provisioned().await;
        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(1, 8), CancellationToken::new())
            .await
            .unwrap();

        durable.fail_next_writes(3);
        writer.enqueue(WriteTask::upsert(&key, "a", 1, None, Utc::now(), 1));
        writer.flush().await.unwrap();
        assert_eq!(writer.dead_letters().await.unwrap(), 1);

        writer.enqueue(WriteTask::upsert(&key, "a", 2, None, Utc::now(), 2));
        writer.flush().await.unwrap();
        assert_eq!(writer.replay_dead_letters().await.unwrap(), 1);
        writer.flush().await.unwrap();

        assert_eq!(durable.rank_row(&key, "a").await.unwrap().score, 2);
        assert_eq!(durable.queue_len(QueueStatus::Pending).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_upsert_does_not_revive_a_deleted_player() {
        let (durable, key) = provisioned().await;
        let stale = WriteTask::upsert(&key, "z", 9, None, Utc::now(), 5);
        durable
            .enqueue_write(&stale, QueueStatus::Dead, 10, Utc::now())
            .await
            .unwrap();
        durable.delete_rank(&key, "z", 10).await.unwrap();

        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(2, 8), CancellationToken::new())
            .await
            .unwrap();
        writer.flush().await.unwrap();

        assert!(durable.rank_row(&key, "z").await.is_none());
        assert_eq!(writer.dead_letters().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_keeps_unfinished_tasks() {
        let (durable, key) = provisioned().await;
        let writer = DurableWriter::start(durable.clone(), AlertLog::new(), &config(1, 8), CancellationToken::new())
            .await
            .unwrap();

        durable.fail_next_writes(u32::MAX);
        writer.enqueue(WriteTask::upsert(&key, "a", 1, None, Utc::now(), 1));
        writer.shutdown(Duration::from_millis(1)).await;

        assert_eq!(durable.queue_len(QueueStatus::Pending).await, 1);
        assert!(durable.rank_row(&key, "a").await.is_none());
    }
}
