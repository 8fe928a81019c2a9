//! In-process gateways.
//!
//! [`MemoryFastStore`] and [`MemoryDurableStore`] implement the gateway
//! traits over plain collections behind a mutex, so the leaderboard core
//! can be exercised without `Dragonfly` or `PostgreSQL`. They follow the
//! production semantics that the core relies on: sorted-set tie ordering,
//! conditional write modes, version stamps, versioned rank rows with
//! tombstones, per-tenant tables that must be provisioned, and leased queue
//! claims. TTLs are not modelled.
//!
//! Both stores can be switched offline, or slowed down, to exercise the
//! core's failure paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leaderboard_types::{
    EntryMetadata, LeaderboardConfig, LeaderboardKey, PlayerMeta, RankInfo, ScoreWrite,
    SortDirection, TenantId, WriteTask, is_exact_score,
};
use tokio::sync::Mutex;

use crate::error::DbError;
use crate::gateway::{
    DurableStore, FastStore, QueueStatus, QueuedWrite, RankRow, Removal, WriteOutcome,
};

/// Shared offline/latency switches.
#[derive(Debug, Default)]
struct Faults {
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl Faults {
    async fn check(&self, store: &str) -> Result<(), DbError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::Relaxed) {
            return Err(DbError::Unavailable(format!("{store} is offline")));
        }
        Ok(())
    }

    fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::Relaxed);
    }
}

// =============================================================================
// Fast store
// =============================================================================

/// A sorted set ordered by `(score, member)`, like Redis.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_owned(), score) {
            self.order.remove(&(old, member.to_owned()));
        }
        self.order.insert((score, member.to_owned()));
    }

    fn remove(&mut self, member: &str) -> bool {
        self.scores.remove(member).is_some_and(|old| self.order.remove(&(old, member.to_owned())))
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    /// 0-based position in ascending order.
    fn ascending_index(&self, member: &str) -> Option<usize> {
        let score = *self.scores.get(member)?;
        Some(self.order.range(..(score, member.to_owned())).count())
    }

    /// 1-based rank under `sort`.
    fn rank(&self, member: &str, sort: SortDirection) -> Option<u64> {
        let idx = self.ascending_index(member)?;
        let rank = match sort {
            SortDirection::Asc => idx.saturating_add(1),
            SortDirection::Desc => self.len().saturating_sub(idx),
        };
        u64::try_from(rank).ok()
    }

    fn ordered(&self, sort: SortDirection) -> Vec<(String, i64)> {
        let pairs = self.order.iter().map(|(s, m)| (m.clone(), *s));
        match sort {
            SortDirection::Asc => pairs.collect(),
            SortDirection::Desc => pairs.rev().collect(),
        }
    }

    /// Remove members beyond `cap` from the losing end, returning them in
    /// ascending score order.
    fn trim(&mut self, cap: usize, sort: SortDirection) -> Vec<String> {
        let excess = self.len().saturating_sub(cap);
        if excess == 0 {
            return Vec::new();
        }
        let victims: Vec<(i64, String)> = match sort {
            SortDirection::Desc => self.order.iter().take(excess).cloned().collect(),
            SortDirection::Asc => self.order.iter().skip(cap).cloned().collect(),
        };
        for (score, member) in &victims {
            self.order.remove(&(*score, member.clone()));
            self.scores.remove(member);
        }
        victims.into_iter().map(|(_, m)| m).collect()
    }
}

#[derive(Debug, Default)]
struct FastState {
    sets: HashMap<String, SortedSet>,
    strings: HashMap<String, String>,
    clocks: HashMap<String, i64>,
}

impl FastState {
    /// Next version for a leaderboard: wall-clock microseconds, strictly
    /// above the previous stamp.
    fn stamp(&mut self, key: &LeaderboardKey) -> i64 {
        let now = Utc::now().timestamp_micros();
        let last = self.clocks.entry(key.clock_key()).or_insert(0);
        let version = now.max(last.saturating_add(1));
        *last = version;
        version
    }
}

/// In-process [`FastStore`].
#[derive(Debug, Default)]
pub struct MemoryFastStore {
    state: Mutex<FastState>,
    faults: Faults,
}

impl MemoryFastStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`DbError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::Relaxed);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.set_latency(latency);
    }

    /// Drop every key, as if the instance restarted empty.
    pub async fn wipe(&self) {
        let mut state = self.state.lock().await;
        state.sets.clear();
        state.strings.clear();
        state.clocks.clear();
    }

    /// Number of metadata blobs stored for a leaderboard.
    pub async fn metadata_count(&self, key: &LeaderboardKey) -> usize {
        let prefix = key.metadata_key("");
        let state = self.state.lock().await;
        state.strings.keys().filter(|k| k.starts_with(&prefix)).count()
    }

    /// Store a raw metadata blob, bypassing the write pipeline.
    pub async fn put_raw(&self, key: String, value: String) {
        self.state.lock().await.strings.insert(key, value);
    }
}

fn decode_metadata(raw: Option<&String>) -> Option<EntryMetadata> {
    raw.and_then(|s| serde_json::from_str(s).ok())
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn apply_write(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        write: ScoreWrite,
        metadata: &EntryMetadata,
        cap: u32,
        sort: SortDirection,
    ) -> Result<WriteOutcome, DbError> {
        self.faults.check("memory fast store").await?;
        let meta_json = serde_json::to_string(metadata)?;
        let meta_key = key.metadata_key(player_id);

        let mut state = self.state.lock().await;
        let set = state.sets.entry(key.rank_set_key()).or_default();
        let current = set.scores.get(player_id).copied();

        let next = match write {
            ScoreWrite::Set(score) => Some(score),
            ScoreWrite::Increment(delta) => current
                .unwrap_or(0)
                .checked_add(delta)
                .filter(|sum| is_exact_score(*sum)),
            ScoreWrite::Improve { score, sort } => current
                .is_none_or(|c| sort.is_better(score, c))
                .then_some(score),
            ScoreWrite::IfAbsent(score) => current.is_none().then_some(score),
        };
        if let Some(score) = next {
            set.insert(player_id, score);
        }
        let score = set.scores.get(player_id).copied();
        let evicted = if cap > 0 {
            set.trim(usize::try_from(cap).unwrap_or(usize::MAX), sort)
        } else {
            Vec::new()
        };

        if next.is_some() {
            // `IfAbsent` keeps an existing blob (SET NX).
            let keep = matches!(write, ScoreWrite::IfAbsent(_)) && state.strings.contains_key(&meta_key);
            if !keep {
                state.strings.insert(meta_key, meta_json);
            }
        }
        for player in &evicted {
            state.strings.remove(&key.metadata_key(player));
        }
        let version = state.stamp(key);
        drop(state);

        Ok(WriteOutcome {
            changed: next.is_some(),
            score,
            evicted,
            version,
        })
    }

    async fn read_score(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
    ) -> Result<Option<i64>, DbError> {
        self.faults.check("memory fast store").await?;
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(&key.rank_set_key())
            .and_then(|s| s.scores.get(player_id).copied()))
    }

    async fn read_rank(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        sort: SortDirection,
    ) -> Result<Option<u64>, DbError> {
        self.faults.check("memory fast store").await?;
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(&key.rank_set_key())
            .and_then(|s| s.rank(player_id, sort)))
    }

    async fn read_position(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        sort: SortDirection,
    ) -> Result<Option<RankInfo>, DbError> {
        self.faults.check("memory fast store").await?;
        let state = self.state.lock().await;
        Ok(state.sets.get(&key.rank_set_key()).and_then(|s| {
            let rank = s.rank(player_id, sort)?;
            let score = *s.scores.get(player_id)?;
            Some(RankInfo { rank, score })
        }))
    }

    async fn range_by_rank(
        &self,
        key: &LeaderboardKey,
        sort: SortDirection,
        start: u64,
        stop: u64,
    ) -> Result<Vec<(String, i64)>, DbError> {
        self.faults.check("memory fast store").await?;
        if stop < start {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        let Some(set) = state.sets.get(&key.rank_set_key()) else {
            return Ok(Vec::new());
        };
        let skip = usize::try_from(start).unwrap_or(usize::MAX);
        let take = usize::try_from(stop.saturating_sub(start).saturating_add(1)).unwrap_or(usize::MAX);
        Ok(set.ordered(sort).into_iter().skip(skip).take(take).collect())
    }

    async fn read_metadata(
        &self,
        key: &LeaderboardKey,
        player_ids: &[String],
    ) -> Result<HashMap<String, PlayerMeta>, DbError> {
        self.faults.check("memory fast store").await?;
        let state = self.state.lock().await;
        let Some(set) = state.sets.get(&key.rank_set_key()) else {
            return Ok(HashMap::new());
        };
        let mut out = HashMap::with_capacity(player_ids.len());
        for player in player_ids {
            let Some(score) = set.scores.get(player).copied() else {
                continue;
            };
            let meta = decode_metadata(state.strings.get(&key.metadata_key(player)));
            out.insert(
                player.clone(),
                meta.map_or_else(
                    || PlayerMeta {
                        score,
                        extra_data: serde_json::Value::Null,
                        created_at: None,
                        updated_at: None,
                    },
                    |m| PlayerMeta {
                        score,
                        extra_data: m.extra_data,
                        created_at: Some(m.created_at),
                        updated_at: Some(m.updated_at),
                    },
                ),
            );
        }
        Ok(out)
    }

    async fn read_entry_metadata(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
    ) -> Result<Option<EntryMetadata>, DbError> {
        self.faults.check("memory fast store").await?;
        let state = self.state.lock().await;
        state
            .strings
            .get(&key.metadata_key(player_id))
            .map(|s| serde_json::from_str(s))
            .transpose()
            .map_err(DbError::from)
    }

    async fn cardinality(&self, key: &LeaderboardKey) -> Result<u64, DbError> {
        self.faults.check("memory fast store").await?;
        let state = self.state.lock().await;
        let len = state.sets.get(&key.rank_set_key()).map_or(0, SortedSet::len);
        Ok(u64::try_from(len).unwrap_or(u64::MAX))
    }

    async fn remove(&self, key: &LeaderboardKey, player_id: &str) -> Result<Removal, DbError> {
        self.faults.check("memory fast store").await?;
        let mut state = self.state.lock().await;
        let removed = state
            .sets
            .get_mut(&key.rank_set_key())
            .is_some_and(|s| s.remove(player_id));
        state.strings.remove(&key.metadata_key(player_id));
        let version = state.stamp(key);
        drop(state);
        Ok(Removal {
            removed: u64::from(removed),
            version,
        })
    }

    async fn clear(&self, key: &LeaderboardKey) -> Result<Removal, DbError> {
        self.faults.check("memory fast store").await?;
        let mut state = self.state.lock().await;
        let members: Vec<String> = state
            .sets
            .remove(&key.rank_set_key())
            .map(|s| s.scores.into_keys().collect())
            .unwrap_or_default();
        for player in &members {
            state.strings.remove(&key.metadata_key(player));
        }
        let version = state.stamp(key);
        drop(state);
        Ok(Removal {
            removed: u64::try_from(members.len()).unwrap_or(u64::MAX),
            version,
        })
    }

    async fn cached_config(
        &self,
        key: &LeaderboardKey,
    ) -> Result<Option<LeaderboardConfig>, DbError> {
        self.faults.check("memory fast store").await?;
        let state = self.state.lock().await;
        state
            .strings
            .get(&key.config_cache_key())
            .map(|s| serde_json::from_str(s))
            .transpose()
            .map_err(DbError::from)
    }

    async fn cache_config(&self, config: &LeaderboardConfig) -> Result<(), DbError> {
        self.faults.check("memory fast store").await?;
        let json = serde_json::to_string(config)?;
        self.state
            .lock()
            .await
            .strings
            .insert(config.key().config_cache_key(), json);
        Ok(())
    }

    async fn invalidate_config(&self, key: &LeaderboardKey) -> Result<(), DbError> {
        self.faults.check("memory fast store").await?;
        self.state
            .lock()
            .await
            .strings
            .remove(&key.config_cache_key());
        Ok(())
    }
}

// =============================================================================
// Durable store
// =============================================================================

#[derive(Debug, Clone)]
struct QueueEntry {
    task: WriteTask,
    status: QueueStatus,
    attempts: u32,
    next_attempt_at: DateTime<Utc>,
    claimed_until: Option<DateTime<Utc>>,
}

/// A rank row with its version; deleted rows stay behind as tombstones.
#[derive(Debug, Clone)]
struct StoredRow {
    row: RankRow,
    version: i64,
    deleted: bool,
}

type RankTable = BTreeMap<(String, String), StoredRow>;

#[derive(Debug, Default)]
struct DurableState {
    /// Rank tables by safe id, rows keyed by `(category, player)`.
    ranks: HashMap<String, RankTable>,
    /// Truncate watermarks by `(safe id, category)`.
    watermarks: HashMap<(String, String), i64>,
    /// Profile tables by safe id.
    profiles: HashMap<String, HashMap<String, String>>,
    configs: BTreeMap<(String, String), LeaderboardConfig>,
    queue: BTreeMap<i64, QueueEntry>,
    next_queue_id: i64,
}

impl DurableState {
    fn rank_table(&mut self, tenant: &TenantId) -> Result<&mut RankTable, DbError> {
        self.ranks
            .get_mut(tenant.safe_id())
            .ok_or_else(|| DbError::MissingTable(tenant.rank_table()))
    }

    fn watermark(&self, key: &LeaderboardKey) -> i64 {
        self.watermarks.get(&config_key(key)).copied().unwrap_or(0)
    }
}

/// Configurations, like storage, are keyed by safe id.
fn config_key(key: &LeaderboardKey) -> (String, String) {
    (key.tenant.safe_id().to_owned(), key.category.clone())
}

/// In-process [`DurableStore`].
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    state: Mutex<DurableState>,
    faults: Faults,
    failing_writes: AtomicU32,
}

impl MemoryDurableStore {
    /// Create an empty store with no provisioned tenants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`DbError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::Relaxed);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.set_latency(latency);
    }

    /// Fail the next `count` rank writes (upsert, delete, truncate).
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::Relaxed);
    }

    fn take_write_failure(&self) -> Result<(), DbError> {
        let tripped = self
            .failing_writes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(DbError::Unavailable("injected write failure".to_owned()));
        }
        Ok(())
    }

    /// Insert or replace a profile document in a provisioned tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingTable`] if the tenant was never provisioned.
    pub async fn put_profile(&self, tenant: &TenantId, player_id: &str, data: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        let table = state
            .profiles
            .get_mut(tenant.safe_id())
            .ok_or_else(|| DbError::MissingTable(tenant.profile_table()))?;
        table.insert(player_id.to_owned(), data.to_owned());
        Ok(())
    }

    /// One live rank row, if present.
    pub async fn rank_row(&self, key: &LeaderboardKey, player_id: &str) -> Option<RankRow> {
        let state = self.state.lock().await;
        state
            .ranks
            .get(key.tenant.safe_id())?
            .get(&(key.category.clone(), player_id.to_owned()))
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.row.clone())
    }

    /// Number of live rank rows stored for a leaderboard.
    pub async fn rank_count(&self, key: &LeaderboardKey) -> usize {
        let state = self.state.lock().await;
        state.ranks.get(key.tenant.safe_id()).map_or(0, |t| {
            t.iter()
                .filter(|((c, _), stored)| *c == key.category && !stored.deleted)
                .count()
        })
    }

    /// Number of queue rows in the given state.
    pub async fn queue_len(&self, status: QueueStatus) -> usize {
        let state = self.state.lock().await;
        state.queue.values().filter(|e| e.status == status).count()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn provision_tenant(&self, tenant: &TenantId) -> Result<(), DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        state.ranks.entry(tenant.safe_id().to_owned()).or_default();
        state.profiles.entry(tenant.safe_id().to_owned()).or_default();
        Ok(())
    }

    async fn upsert_rank(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        score: i64,
        extra_data: Option<&str>,
        now: DateTime<Utc>,
        version: i64,
    ) -> Result<(), DbError> {
        self.faults.check("memory durable store").await?;
        self.take_write_failure()?;
        let mut state = self.state.lock().await;
        let watermark = state.watermark(key);
        let table = state.rank_table(&key.tenant)?;
        if version <= watermark {
            return Ok(());
        }
        let fresh = StoredRow {
            row: RankRow {
                player_id: player_id.to_owned(),
                score,
                extra_data: extra_data.map(str::to_owned),
                created_at: now,
                updated_at: now,
            },
            version,
            deleted: false,
        };
        table
            .entry((key.category.clone(), player_id.to_owned()))
            .and_modify(|stored| {
                if stored.version >= version {
                    return;
                }
                let created_at = if stored.deleted { now } else { stored.row.created_at };
                *stored = StoredRow {
                    row: RankRow {
                        created_at,
                        ..fresh.row.clone()
                    },
                    version,
                    deleted: false,
                };
            })
            .or_insert_with(|| fresh.clone());
        Ok(())
    }

    async fn delete_rank(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        version: i64,
    ) -> Result<(), DbError> {
        self.faults.check("memory durable store").await?;
        self.take_write_failure()?;
        let mut state = self.state.lock().await;
        let watermark = state.watermark(key);
        let table = state.rank_table(&key.tenant)?;
        if version <= watermark {
            return Ok(());
        }
        let now = Utc::now();
        let tombstone = StoredRow {
            row: RankRow {
                player_id: player_id.to_owned(),
                score: 0,
                extra_data: None,
                created_at: now,
                updated_at: now,
            },
            version,
            deleted: true,
        };
        table
            .entry((key.category.clone(), player_id.to_owned()))
            .and_modify(|stored| {
                if stored.version < version {
                    *stored = tombstone.clone();
                }
            })
            .or_insert_with(|| tombstone.clone());
        Ok(())
    }

    async fn truncate_ranks(&self, key: &LeaderboardKey, version: i64) -> Result<u64, DbError> {
        self.faults.check("memory durable store").await?;
        self.take_write_failure()?;
        let mut state = self.state.lock().await;
        let table = state.rank_table(&key.tenant)?;
        let mut removed: u64 = 0;
        table.retain(|(category, _), stored| {
            let drop_row = *category == key.category && stored.version < version;
            if drop_row && !stored.deleted {
                removed = removed.saturating_add(1);
            }
            !drop_row
        });
        let watermark = state.watermarks.entry(config_key(key)).or_insert(0);
        *watermark = (*watermark).max(version);
        Ok(removed)
    }

    async fn page_ranks(
        &self,
        key: &LeaderboardKey,
        sort: SortDirection,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<RankRow>, u64), DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        let table = state.rank_table(&key.tenant)?;
        let mut rows: Vec<RankRow> = table
            .iter()
            .filter(|((category, _), stored)| *category == key.category && !stored.deleted)
            .map(|(_, stored)| stored.row.clone())
            .collect();
        rows.sort_by(|a, b| {
            let by_score = match sort {
                SortDirection::Asc => a.score.cmp(&b.score),
                SortDirection::Desc => b.score.cmp(&a.score),
            };
            by_score.then_with(|| a.player_id.cmp(&b.player_id))
        });
        let total = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        let page = rows
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn load_profiles(
        &self,
        tenant: &TenantId,
        player_ids: &[String],
    ) -> Result<HashMap<String, String>, DbError> {
        self.faults.check("memory durable store").await?;
        let state = self.state.lock().await;
        let table = state
            .profiles
            .get(tenant.safe_id())
            .ok_or_else(|| DbError::MissingTable(tenant.profile_table()))?;
        Ok(player_ids
            .iter()
            .filter_map(|p| table.get(p).map(|data| (p.clone(), data.clone())))
            .collect())
    }

    async fn get_config(
        &self,
        key: &LeaderboardKey,
    ) -> Result<Option<LeaderboardConfig>, DbError> {
        self.faults.check("memory durable store").await?;
        let state = self.state.lock().await;
        Ok(state.configs.get(&config_key(key)).cloned())
    }

    async fn list_configs(&self, tenant: &TenantId) -> Result<Vec<LeaderboardConfig>, DbError> {
        self.faults.check("memory durable store").await?;
        let state = self.state.lock().await;
        Ok(state
            .configs
            .values()
            .filter(|c| c.tenant.safe_id() == tenant.safe_id())
            .cloned()
            .collect())
    }

    async fn list_enabled_configs(&self) -> Result<Vec<LeaderboardConfig>, DbError> {
        self.faults.check("memory durable store").await?;
        let state = self.state.lock().await;
        Ok(state.configs.values().filter(|c| c.enabled).cloned().collect())
    }

    async fn insert_config(&self, config: &LeaderboardConfig) -> Result<bool, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        let key = config_key(&config.key());
        if state.configs.contains_key(&key) {
            return Ok(false);
        }
        state.configs.insert(key, config.clone());
        Ok(true)
    }

    async fn update_config(&self, config: &LeaderboardConfig) -> Result<bool, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        let Some(stored) = state.configs.get_mut(&config_key(&config.key())) else {
            return Ok(false);
        };
        let last_reset_at = stored.last_reset_at;
        *stored = config.clone();
        stored.last_reset_at = last_reset_at;
        Ok(true)
    }

    async fn delete_config(&self, key: &LeaderboardKey) -> Result<bool, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        Ok(state.configs.remove(&config_key(key)).is_some())
    }

    async fn mark_reset(
        &self,
        key: &LeaderboardKey,
        previous: Option<DateTime<Utc>>,
        boundary: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        match state.configs.get_mut(&config_key(key)) {
            Some(config) if config.last_reset_at == previous => {
                config.last_reset_at = Some(boundary);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_reset(
        &self,
        key: &LeaderboardKey,
        boundary: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        match state.configs.get_mut(&config_key(key)) {
            Some(config) if config.last_reset_at == Some(boundary) => {
                config.last_reset_at = previous;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn enqueue_write(
        &self,
        task: &WriteTask,
        status: QueueStatus,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        state.next_queue_id = state.next_queue_id.saturating_add(1);
        let id = state.next_queue_id;
        state.queue.insert(
            id,
            QueueEntry {
                task: task.clone(),
                status,
                attempts,
                next_attempt_at,
                claimed_until: None,
            },
        );
        Ok(id)
    }

    async fn claim_writes(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueuedWrite>, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(state
            .queue
            .iter_mut()
            .filter(|(_, e)| {
                e.status == QueueStatus::Pending
                    && e.next_attempt_at <= now
                    && e.claimed_until.is_none_or(|until| until <= now)
            })
            .take(limit)
            .map(|(id, e)| {
                e.claimed_until = Some(lease_until);
                QueuedWrite {
                    id: *id,
                    task: e.task.clone(),
                    attempts: e.attempts,
                }
            })
            .collect())
    }

    async fn complete_write(&self, id: i64) -> Result<(), DbError> {
        self.faults.check("memory durable store").await?;
        self.state.lock().await.queue.remove(&id);
        Ok(())
    }

    async fn bury_write(&self, id: i64, attempts: u32) -> Result<(), DbError> {
        self.faults.check("memory durable store").await?;
        if let Some(entry) = self.state.lock().await.queue.get_mut(&id) {
            entry.status = QueueStatus::Dead;
            entry.attempts = attempts;
            entry.claimed_until = None;
        }
        Ok(())
    }

    async fn requeue_dead_writes(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        self.faults.check("memory durable store").await?;
        let mut state = self.state.lock().await;
        let mut moved: u64 = 0;
        for entry in state.queue.values_mut().filter(|e| e.status == QueueStatus::Dead) {
            entry.status = QueueStatus::Pending;
            entry.attempts = 0;
            entry.next_attempt_at = now;
            entry.claimed_until = None;
            moved = moved.saturating_add(1);
        }
        Ok(moved)
    }

    async fn count_dead_writes(&self) -> Result<u64, DbError> {
        self.faults.check("memory durable store").await?;
        let state = self.state.lock().await;
        let dead = state.queue.values().filter(|e| e.status == QueueStatus::Dead).count();
        Ok(u64::try_from(dead).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn key() -> LeaderboardKey {
        LeaderboardKey::parse("game-1", "weekly").unwrap()
    }

    fn meta() -> EntryMetadata {
        let now = Utc::now();
        EntryMetadata {
            extra_data: serde_json::json!({"stage": 3}),
            created_at: now,
            updated_at: now,
        }
    }

    async fn write(store: &MemoryFastStore, player: &str, write: ScoreWrite, cap: u32, sort: SortDirection) -> WriteOutcome {
        store.apply_write(&key(), player, write, &meta(), cap, sort).await.unwrap()
    }

    #[tokio::test]
    async fn desc_cap_evicts_lowest_and_its_metadata() {
        let store = MemoryFastStore::new();
        let desc = SortDirection::Desc;
        write(&store, "A", ScoreWrite::Set(100), 3, desc).await;
        write(&store, "B", ScoreWrite::Set(200), 3, desc).await;
        write(&store, "C", ScoreWrite::Set(150), 3, desc).await;
        let out = write(&store, "D", ScoreWrite::Set(180), 3, desc).await;

        assert_eq!(out.evicted, vec!["A".to_owned()]);
        assert_eq!(out.score, Some(180));
        assert_eq!(store.cardinality(&key()).await.unwrap(), 3);
        assert_eq!(store.metadata_count(&key()).await, 3);
        let top = store.range_by_rank(&key(), desc, 0, 9).await.unwrap();
        assert_eq!(
            top,
            vec![("B".to_owned(), 200), ("D".to_owned(), 180), ("C".to_owned(), 150)]
        );
    }

    #[tokio::test]
    async fn asc_cap_evicts_highest() {
        let store = MemoryFastStore::new();
        let asc = SortDirection::Asc;
        write(&store, "A", ScoreWrite::Set(50), 2, asc).await;
        write(&store, "B", ScoreWrite::Set(30), 2, asc).await;
        let out = write(&store, "C", ScoreWrite::Set(40), 2, asc).await;
        assert_eq!(out.evicted, vec!["A".to_owned()]);
        assert_eq!(store.read_rank(&key(), "B", asc).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn write_modes_follow_zadd_flags() {
        let store = MemoryFastStore::new();
        let desc = SortDirection::Desc;
        write(&store, "X", ScoreWrite::Increment(10), 0, desc).await;
        let out = write(&store, "X", ScoreWrite::Increment(-3), 0, desc).await;
        assert_eq!(out.score, Some(7));

        let improve = ScoreWrite::Improve { score: 5, sort: desc };
        assert_eq!(write(&store, "X", improve, 0, desc).await.score, Some(7));
        let improve = ScoreWrite::Improve { score: 9, sort: desc };
        assert_eq!(write(&store, "X", improve, 0, desc).await.score, Some(9));

        assert_eq!(write(&store, "X", ScoreWrite::IfAbsent(1), 0, desc).await.score, Some(9));
        assert_eq!(write(&store, "Y", ScoreWrite::IfAbsent(1), 0, desc).await.score, Some(1));
    }

    #[tokio::test]
    async fn ties_rank_like_redis() {
        let store = MemoryFastStore::new();
        let desc = SortDirection::Desc;
        write(&store, "a", ScoreWrite::Set(10), 0, desc).await;
        write(&store, "b", ScoreWrite::Set(10), 0, desc).await;
        // ZREVRANK orders equal scores by reverse member order.
        assert_eq!(store.read_rank(&key(), "b", desc).await.unwrap(), Some(1));
        assert_eq!(store.read_rank(&key(), "a", desc).await.unwrap(), Some(2));
        assert_eq!(store.read_rank(&key(), "a", SortDirection::Asc).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn clear_leaves_no_metadata() {
        let store = MemoryFastStore::new();
        write(&store, "A", ScoreWrite::Set(1), 0, SortDirection::Desc).await;
        write(&store, "B", ScoreWrite::Set(2), 0, SortDirection::Desc).await;
        assert_eq!(store.clear(&key()).await.unwrap().removed, 2);
        assert_eq!(store.cardinality(&key()).await.unwrap(), 0);
        assert_eq!(store.metadata_count(&key()).await, 0);
    }

    #[tokio::test]
    async fn offline_fast_store_is_unavailable() {
        let store = MemoryFastStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.read_score(&key(), "A").await,
            Err(DbError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn durable_tables_require_provisioning() {
        let store = MemoryDurableStore::new();
        let err = store
            .upsert_rank(&key(), "A", 1, None, Utc::now(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::MissingTable(ref t) if t == "ranks_game_1"));

        store.provision_tenant(&key().tenant).await.unwrap();
        store.provision_tenant(&key().tenant).await.unwrap();
        store.upsert_rank(&key(), "A", 1, None, Utc::now(), 1).await.unwrap();
        assert_eq!(store.rank_count(&key()).await, 1);
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let store = MemoryDurableStore::new();
        store.provision_tenant(&key().tenant).await.unwrap();
        let first = Utc::now();
        let later = first + chrono::TimeDelta::seconds(30);
        store.upsert_rank(&key(), "A", 1, None, first, 1).await.unwrap();
        store.upsert_rank(&key(), "A", 5, Some("{}"), later, 2).await.unwrap();
        let row = store.rank_row(&key(), "A").await.unwrap();
        assert_eq!(row.score, 5);
        assert_eq!(row.created_at, first);
        assert_eq!(row.updated_at, later);
    }

    #[tokio::test]
    async fn page_orders_by_sort_direction() {
        let store = MemoryDurableStore::new();
        store.provision_tenant(&key().tenant).await.unwrap();
        for (player, score) in [("a", 3), ("b", 9), ("c", 5)] {
            store.upsert_rank(&key(), player, score, None, Utc::now(), 1).await.unwrap();
        }
        store.delete_rank(&key(), "zz", 1).await.unwrap();
        let (rows, total) = store.page_ranks(&key(), SortDirection::Desc, 0, 2).await.unwrap();
        assert_eq!(total, 3);
        let ids: Vec<_> = rows.iter().map(|r| r.player_id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
        let (rows, _) = store.page_ranks(&key(), SortDirection::Asc, 1, 5).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.player_id.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);
    }

    #[tokio::test]
    async fn mark_reset_is_compare_and_set() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();
        let request = serde_json::from_str(r#"{"category":"weekly"}"#).unwrap();
        let config = LeaderboardConfig::from_request(key().tenant, request, now);
        assert!(store.insert_config(&config).await.unwrap());
        assert!(!store.insert_config(&config).await.unwrap());

        assert!(store.mark_reset(&key(), None, now).await.unwrap());
        assert!(!store.mark_reset(&key(), None, now).await.unwrap());
        let stored = store.get_config(&key()).await.unwrap().unwrap();
        assert_eq!(stored.last_reset_at, Some(now));

        assert!(store.restore_reset(&key(), now, None).await.unwrap());
        assert!(!store.restore_reset(&key(), now, None).await.unwrap());
        let stored = store.get_config(&key()).await.unwrap().unwrap();
        assert_eq!(stored.last_reset_at, None);
    }

    #[tokio::test]
    async fn tenants_sharing_a_safe_id_share_configs() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();
        let request = serde_json::from_str(r#"{"category":"weekly"}"#).unwrap();
        let dotted = LeaderboardConfig::from_request(TenantId::parse("game.1").unwrap(), request, now);
        assert!(store.insert_config(&dotted).await.unwrap());

        let request = serde_json::from_str(r#"{"category":"weekly","sort":"asc"}"#).unwrap();
        let dashed = LeaderboardConfig::from_request(key().tenant, request, now);
        assert!(!store.insert_config(&dashed).await.unwrap());

        let seen = store.get_config(&key()).await.unwrap().unwrap();
        assert_eq!(seen.tenant.as_str(), "game.1");
        assert_eq!(seen.sort, SortDirection::Desc);
        assert_eq!(store.list_configs(&key().tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn older_versions_never_overwrite_newer_rows() {
        let store = MemoryDurableStore::new();
        store.provision_tenant(&key().tenant).await.unwrap();
        let now = Utc::now();

        store.upsert_rank(&key(), "A", 20, None, now, 20).await.unwrap();
        store.upsert_rank(&key(), "A", 10, None, now, 10).await.unwrap();
        assert_eq!(store.rank_row(&key(), "A").await.unwrap().score, 20);

        // A tombstone keeps a late upsert from bringing the row back.
        store.delete_rank(&key(), "A", 30).await.unwrap();
        store.upsert_rank(&key(), "A", 25, None, now, 25).await.unwrap();
        assert!(store.rank_row(&key(), "A").await.is_none());
        store.upsert_rank(&key(), "A", 40, None, now, 40).await.unwrap();
        assert_eq!(store.rank_row(&key(), "A").await.unwrap().score, 40);

        // A delete older than the row is ignored.
        store.delete_rank(&key(), "A", 35).await.unwrap();
        assert_eq!(store.rank_row(&key(), "A").await.unwrap().score, 40);
    }

    #[tokio::test]
    async fn truncate_sets_a_watermark() {
        let store = MemoryDurableStore::new();
        store.provision_tenant(&key().tenant).await.unwrap();
        let now = Utc::now();
        store.upsert_rank(&key(), "A", 1, None, now, 10).await.unwrap();
        store.upsert_rank(&key(), "B", 2, None, now, 60).await.unwrap();
        store.delete_rank(&key(), "C", 20).await.unwrap();

        assert_eq!(store.truncate_ranks(&key(), 50).await.unwrap(), 1);
        assert!(store.rank_row(&key(), "A").await.is_none());
        assert_eq!(store.rank_row(&key(), "B").await.unwrap().score, 2);

        store.upsert_rank(&key(), "D", 4, None, now, 40).await.unwrap();
        assert!(store.rank_row(&key(), "D").await.is_none());
        store.upsert_rank(&key(), "D", 5, None, now, 70).await.unwrap();
        assert_eq!(store.rank_count(&key()).await, 2);
    }

    #[tokio::test]
    async fn losing_improve_leaves_metadata_alone() {
        let store = MemoryFastStore::new();
        let desc = SortDirection::Desc;
        let winner = write(&store, "A", ScoreWrite::Set(90), 0, desc).await;
        assert!(winner.changed);
        let before = store.read_entry_metadata(&key(), "A").await.unwrap();

        let late = EntryMetadata {
            extra_data: serde_json::json!({"stage": 1}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let improve = ScoreWrite::Improve { score: 50, sort: desc };
        let out = store.apply_write(&key(), "A", improve, &late, 0, desc).await.unwrap();
        assert!(!out.changed);
        assert_eq!(out.score, Some(90));
        assert_eq!(store.read_entry_metadata(&key(), "A").await.unwrap(), before);
        assert!(out.version > winner.version);
    }

    #[tokio::test]
    async fn increment_past_exact_range_is_refused() {
        let store = MemoryFastStore::new();
        let desc = SortDirection::Desc;
        write(&store, "A", ScoreWrite::Set(leaderboard_types::MAX_SCORE_MAGNITUDE), 0, desc).await;
        let out = write(&store, "A", ScoreWrite::Increment(1), 0, desc).await;
        assert!(!out.changed);
        assert_eq!(out.score, Some(leaderboard_types::MAX_SCORE_MAGNITUDE));
    }

    #[tokio::test]
    async fn versions_increase_across_writes_removals_and_clears() {
        let store = MemoryFastStore::new();
        let first = write(&store, "A", ScoreWrite::Set(1), 0, SortDirection::Desc).await;
        let removal = store.remove(&key(), "A").await.unwrap();
        let cleared = store.clear(&key()).await.unwrap();
        assert_eq!(removal.removed, 1);
        assert_eq!(cleared.removed, 0);
        assert!(first.version < removal.version);
        assert!(removal.version < cleared.version);
    }

    #[tokio::test]
    async fn queue_claims_are_leased_and_dead_letters_requeue() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();
        let lease = now + chrono::TimeDelta::seconds(60);
        let task = WriteTask::truncate(&key(), 1);
        let id = store.enqueue_write(&task, QueueStatus::Pending, 0, now).await.unwrap();
        store.enqueue_write(&task, QueueStatus::Dead, 10, now).await.unwrap();

        let claimed = store.claim_writes(now, lease, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed.first().map(|w| w.id), Some(id));
        assert!(store.claim_writes(now, lease, 10).await.unwrap().is_empty());
        assert_eq!(store.claim_writes(lease, lease, 10).await.unwrap().len(), 1);

        assert_eq!(store.count_dead_writes().await.unwrap(), 1);
        assert_eq!(store.requeue_dead_writes(now).await.unwrap(), 1);
        assert_eq!(store.count_dead_writes().await.unwrap(), 0);
        assert_eq!(store.queue_len(QueueStatus::Pending).await, 2);
    }
}
