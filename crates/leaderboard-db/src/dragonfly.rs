//! `Dragonfly` (Redis-compatible) fast store.
//!
//! `Dragonfly` holds every live leaderboard as a sorted set plus one JSON
//! metadata blob per member. Writes that touch more than one key run as Lua
//! scripts, so a conditional write, its metadata, the cap trim, and the
//! evicted members' metadata change together. Reads that need a consistent
//! view of two keys use `MULTI/EXEC`.
//!
//! Every scripted change is stamped with a version from the leaderboard's
//! clock key: server time in microseconds, forced strictly above the last
//! stamp. The durable store orders writes by that version.
//!
//! The scripts touch metadata keys of evicted members that cannot be named
//! up front, so they carry Dragonfly's `allow-undeclared-keys` flag.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `leaderboard:{tenant}:{category}` | Sorted set | Member = player, score = score |
//! | `leaderboard_data:{tenant}:{category}:{player}` | JSON, 7d TTL | [`EntryMetadata`] |
//! | `leaderboard_clock:{tenant}:{category}` | Integer | Last version stamped |
//! | `leaderboard_config:{tenant}:{category}` | JSON, 10m TTL | Cached [`LeaderboardConfig`] |

use std::collections::HashMap;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::Expiration;
use leaderboard_types::{
    EntryMetadata, LeaderboardConfig, LeaderboardKey, MAX_SCORE_MAGNITUDE, PlayerMeta, RankInfo,
    ScoreWrite, SortDirection,
};

use crate::error::DbError;
use crate::gateway::{CONFIG_CACHE_TTL_SECS, FastStore, METADATA_TTL_SECS, Removal, WriteOutcome};

/// Default number of connections in the client pool.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Conditional score write, metadata, cap trim, and version stamp.
///
/// `KEYS`: set, metadata, clock. `ARGV`: mode, score, player, metadata
/// JSON, TTL, trim start, trim stop (trim skipped when start is empty),
/// metadata key prefix, score limit.
const WRITE_SCRIPT: &str = r"#!lua flags=allow-undeclared-keys
local set, meta, clock = KEYS[1], KEYS[2], KEYS[3]
local mode, player = ARGV[1], ARGV[3]
local score = tonumber(ARGV[2])
local limit = tonumber(ARGV[9])

local current = redis.call('ZSCORE', set, player)
if current then current = tonumber(current) end

local accept = false
if mode == 'set' then
  accept = true
elseif mode == 'incr' then
  local base = current or 0
  if score >= 0 then
    accept = score <= limit - base
  else
    accept = score >= -limit - base
  end
elseif mode == 'improve_desc' then
  accept = (not current) or score > current
elseif mode == 'improve_asc' then
  accept = (not current) or score < current
else
  accept = not current
end

if accept then
  if mode == 'incr' then
    redis.call('ZINCRBY', set, ARGV[2], player)
  else
    redis.call('ZADD', set, ARGV[2], player)
  end
  if mode == 'absent' then
    redis.call('SET', meta, ARGV[4], 'EX', ARGV[5], 'NX')
  else
    redis.call('SET', meta, ARGV[4], 'EX', ARGV[5])
  end
end
local after = redis.call('ZSCORE', set, player)

local evicted = {}
if ARGV[6] ~= '' then
  evicted = redis.call('ZRANGE', set, ARGV[6], ARGV[7])
  if #evicted > 0 then
    redis.call('ZREMRANGEBYRANK', set, ARGV[6], ARGV[7])
    for _, member in ipairs(evicted) do
      redis.call('DEL', ARGV[8] .. member)
    end
  end
end

local t = redis.call('TIME')
local version = tonumber(t[1]) * 1000000 + tonumber(t[2])
local last = tonumber(redis.call('GET', clock) or '0')
if version <= last then version = last + 1 end
redis.call('SET', clock, string.format('%.0f', version))

return {accept and 1 or 0, after or false, version, evicted}
";

/// Member removal plus metadata, with a version stamp.
///
/// `KEYS`: set, metadata, clock. `ARGV`: player.
const REMOVE_SCRIPT: &str = r"#!lua flags=allow-undeclared-keys
local removed = redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('DEL', KEYS[2])

local t = redis.call('TIME')
local version = tonumber(t[1]) * 1000000 + tonumber(t[2])
local last = tonumber(redis.call('GET', KEYS[3]) or '0')
if version <= last then version = last + 1 end
redis.call('SET', KEYS[3], string.format('%.0f', version))

return {removed, version}
";

/// Whole-set delete plus every member's metadata, with a version stamp.
///
/// `KEYS`: set, clock. `ARGV`: metadata key prefix.
const CLEAR_SCRIPT: &str = r"#!lua flags=allow-undeclared-keys
local members = redis.call('ZRANGE', KEYS[1], 0, -1)
redis.call('DEL', KEYS[1])
for _, member in ipairs(members) do
  redis.call('DEL', ARGV[1] .. member)
end

local t = redis.call('TIME')
local version = tonumber(t[1]) * 1000000 + tonumber(t[2])
local last = tonumber(redis.call('GET', KEYS[2]) or '0')
if version <= last then version = last + 1 end
redis.call('SET', KEYS[2], string.format('%.0f', version))

return {#members, version}
";

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a round-robin [`fred::prelude::Pool`] of clients.
#[derive(Clone)]
pub struct DragonflyPool {
    pool: Pool,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL with [`DEFAULT_POOL_SIZE`]
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        Self::connect_with_size(url, DEFAULT_POOL_SIZE).await
    }

    /// Connect to `Dragonfly` with an explicit pool size.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect_with_size(url: &str, size: usize) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let pool = Builder::from_config(config).build_pool(size.max(1))?;
        pool.init().await?;

        tracing::info!(pool_size = size, "Connected to Dragonfly");
        Ok(Self { pool })
    }

    fn client(&self) -> &Client {
        self.pool.next()
    }

    /// Close every connection in the pool.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the quit command fails.
    pub async fn close(&self) -> Result<(), DbError> {
        self.pool.quit().await?;
        tracing::info!("Dragonfly pool closed");
        Ok(())
    }
}

// =============================================================================
// Score conversion
// =============================================================================

/// Sorted-set scores are doubles; integer scores are exact up to 2^53.
#[allow(clippy::cast_possible_truncation)]
fn from_f64(score: f64) -> i64 {
    score.round() as i64
}

/// Convert a 0-based store rank to a 1-based rank.
fn one_based(rank: i64) -> Option<u64> {
    u64::try_from(rank).ok().and_then(|r| r.checked_add(1))
}

fn index(position: u64) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX)
}

/// `(start, stop)` indexes of the losing end once the set holds more than
/// `cap` members. Desc keeps the highest scores, asc the lowest.
fn trim_range(cap: u32, sort: SortDirection) -> (i64, i64) {
    match sort {
        SortDirection::Desc => (0, (-1_i64).saturating_sub(i64::from(cap))),
        SortDirection::Asc => (i64::from(cap), -1),
    }
}

fn next_value(values: &mut std::vec::IntoIter<Value>) -> Value {
    values.next().unwrap_or(Value::Null)
}

// =============================================================================
// FastStore
// =============================================================================

#[async_trait]
impl FastStore for DragonflyPool {
    async fn apply_write(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        write: ScoreWrite,
        metadata: &EntryMetadata,
        cap: u32,
        sort: SortDirection,
    ) -> Result<WriteOutcome, DbError> {
        let meta_json = serde_json::to_string(metadata)?;
        let (mode, score) = match write {
            ScoreWrite::Set(score) => ("set", score),
            ScoreWrite::Increment(delta) => ("incr", delta),
            ScoreWrite::Improve {
                score,
                sort: SortDirection::Desc,
            } => ("improve_desc", score),
            ScoreWrite::Improve {
                score,
                sort: SortDirection::Asc,
            } => ("improve_asc", score),
            ScoreWrite::IfAbsent(score) => ("absent", score),
        };
        let (trim_start, trim_stop) = if cap > 0 {
            let (start, stop) = trim_range(cap, sort);
            (start.to_string(), stop.to_string())
        } else {
            (String::new(), String::new())
        };

        let keys = vec![key.rank_set_key(), key.metadata_key(player_id), key.clock_key()];
        let args = vec![
            mode.to_owned(),
            score.to_string(),
            player_id.to_owned(),
            meta_json,
            METADATA_TTL_SECS.to_string(),
            trim_start,
            trim_stop,
            key.metadata_key(""),
            MAX_SCORE_MAGNITUDE.to_string(),
        ];
        let reply: Vec<Value> = self.client().eval(WRITE_SCRIPT, keys, args).await?;

        let mut values = reply.into_iter();
        let changed: i64 = next_value(&mut values).convert()?;
        let score: Option<f64> = next_value(&mut values).convert()?;
        let version: i64 = next_value(&mut values).convert()?;
        let evicted: Vec<String> = next_value(&mut values).convert()?;

        if !evicted.is_empty() {
            tracing::debug!(
                leaderboard = %key,
                evicted = evicted.len(),
                "Trimmed leaderboard to cap"
            );
        }

        Ok(WriteOutcome {
            changed: changed > 0,
            score: score.map(from_f64),
            evicted,
            version,
        })
    }

    async fn read_score(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
    ) -> Result<Option<i64>, DbError> {
        let score: Option<f64> = self.client().zscore(key.rank_set_key(), player_id).await?;
        Ok(score.map(from_f64))
    }

    async fn read_rank(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        sort: SortDirection,
    ) -> Result<Option<u64>, DbError> {
        let set_key = key.rank_set_key();
        let rank: Option<i64> = match sort {
            SortDirection::Desc => self.client().zrevrank(set_key, player_id, false).await?,
            SortDirection::Asc => self.client().zrank(set_key, player_id, false).await?,
        };
        Ok(rank.and_then(one_based))
    }

    async fn read_position(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        sort: SortDirection,
    ) -> Result<Option<RankInfo>, DbError> {
        let set_key = key.rank_set_key();
        let trx = self.client().multi();
        let _: () = match sort {
            SortDirection::Desc => trx.zrevrank(set_key.as_str(), player_id, false).await?,
            SortDirection::Asc => trx.zrank(set_key.as_str(), player_id, false).await?,
        };
        let _: () = trx.zscore(set_key.as_str(), player_id).await?;
        let results: Vec<Value> = trx.exec(true).await?;

        let mut values = results.into_iter();
        let rank: Option<i64> = next_value(&mut values).convert()?;
        let score: Option<f64> = next_value(&mut values).convert()?;
        Ok(match (rank.and_then(one_based), score) {
            (Some(rank), Some(score)) => Some(RankInfo {
                rank,
                score: from_f64(score),
            }),
            _ => None,
        })
    }

    async fn range_by_rank(
        &self,
        key: &LeaderboardKey,
        sort: SortDirection,
        start: u64,
        stop: u64,
    ) -> Result<Vec<(String, i64)>, DbError> {
        let set_key = key.rank_set_key();
        let (start, stop) = (index(start), index(stop));
        let rows: Vec<(String, f64)> = match sort {
            SortDirection::Desc => self.client().zrevrange(set_key, start, stop, true).await?,
            SortDirection::Asc => {
                self.client()
                    .zrange(set_key, start, stop, None, false, None, true)
                    .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|(player, score)| (player, from_f64(score)))
            .collect())
    }

    async fn read_metadata(
        &self,
        key: &LeaderboardKey,
        player_ids: &[String],
    ) -> Result<HashMap<String, PlayerMeta>, DbError> {
        if player_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let meta_keys: Vec<String> = player_ids.iter().map(|p| key.metadata_key(p)).collect();

        let trx = self.client().multi();
        let _: () = trx.zmscore(key.rank_set_key(), player_ids.to_vec()).await?;
        let _: () = trx.mget(meta_keys).await?;
        let results: Vec<Value> = trx.exec(true).await?;

        let mut values = results.into_iter();
        let scores: Vec<Option<f64>> = next_value(&mut values).convert()?;
        let blobs: Vec<Option<String>> = next_value(&mut values).convert()?;

        let mut out = HashMap::with_capacity(player_ids.len());
        for (i, player) in player_ids.iter().enumerate() {
            let Some(score) = scores.get(i).copied().flatten() else {
                continue;
            };
            let meta = blobs
                .get(i)
                .and_then(Option::as_deref)
                .and_then(|raw| match serde_json::from_str::<EntryMetadata>(raw) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        tracing::warn!(leaderboard = %key, player, error = %e, "Ignoring malformed metadata blob");
                        None
                    }
                });
            let entry = meta.map_or_else(
                || PlayerMeta {
                    score: from_f64(score),
                    extra_data: serde_json::Value::Null,
                    created_at: None,
                    updated_at: None,
                },
                |m| PlayerMeta {
                    score: from_f64(score),
                    extra_data: m.extra_data,
                    created_at: Some(m.created_at),
                    updated_at: Some(m.updated_at),
                },
            );
            out.insert(player.clone(), entry);
        }
        Ok(out)
    }

    async fn read_entry_metadata(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
    ) -> Result<Option<EntryMetadata>, DbError> {
        let raw: Option<String> = self.client().get(key.metadata_key(player_id)).await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(DbError::from)
    }

    async fn cardinality(&self, key: &LeaderboardKey) -> Result<u64, DbError> {
        let count: u64 = self.client().zcard(key.rank_set_key()).await?;
        Ok(count)
    }

    async fn remove(&self, key: &LeaderboardKey, player_id: &str) -> Result<Removal, DbError> {
        let keys = vec![key.rank_set_key(), key.metadata_key(player_id), key.clock_key()];
        let reply: Vec<Value> = self.client().eval(REMOVE_SCRIPT, keys, player_id).await?;

        let mut values = reply.into_iter();
        let removed: u64 = next_value(&mut values).convert()?;
        let version: i64 = next_value(&mut values).convert()?;
        Ok(Removal { removed, version })
    }

    async fn clear(&self, key: &LeaderboardKey) -> Result<Removal, DbError> {
        let keys = vec![key.rank_set_key(), key.clock_key()];
        let reply: Vec<Value> = self
            .client()
            .eval(CLEAR_SCRIPT, keys, key.metadata_key(""))
            .await?;

        let mut values = reply.into_iter();
        let removed: u64 = next_value(&mut values).convert()?;
        let version: i64 = next_value(&mut values).convert()?;
        tracing::debug!(leaderboard = %key, removed, "Cleared fast store");
        Ok(Removal { removed, version })
    }

    async fn cached_config(
        &self,
        key: &LeaderboardKey,
    ) -> Result<Option<LeaderboardConfig>, DbError> {
        let raw: Option<String> = self.client().get(key.config_cache_key()).await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(DbError::from)
    }

    async fn cache_config(&self, config: &LeaderboardConfig) -> Result<(), DbError> {
        let json = serde_json::to_string(config)?;
        let _: () = self
            .client()
            .set(
                config.key().config_cache_key(),
                json.as_str(),
                Some(Expiration::EX(CONFIG_CACHE_TTL_SECS)),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    async fn invalidate_config(&self, key: &LeaderboardKey) -> Result<(), DbError> {
        let _: i64 = self.client().del(key.config_cache_key()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_range_targets_losing_end() {
        assert_eq!(trim_range(3, SortDirection::Desc), (0, -4));
        assert_eq!(trim_range(3, SortDirection::Asc), (3, -1));
        assert_eq!(trim_range(1, SortDirection::Desc), (0, -2));
    }

    #[test]
    fn rank_conversion_is_one_based() {
        assert_eq!(one_based(0), Some(1));
        assert_eq!(one_based(41), Some(42));
        assert_eq!(one_based(-1), None);
    }

    #[test]
    fn score_conversion_is_exact_for_integers() {
        assert_eq!(from_f64(9_007_199_254_740_992.0), MAX_SCORE_MAGNITUDE);
        assert_eq!(from_f64(-3.0), -3);
    }
}
