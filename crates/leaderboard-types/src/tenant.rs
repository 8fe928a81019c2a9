//! Tenant namespacing.
//!
//! Every storage name in the system derives from a tenant's *safe id*:
//! the application identifier with `.` and `-` mapped to `_`, restricted
//! to `[A-Za-z0-9_]`. The safe id is the only tenant-derived text that is
//! ever interpolated into SQL (as part of a table name).
//!
//! # Naming scheme
//!
//! | Name | Store | Example |
//! |------|-------|---------|
//! | `ranks_{safe}` | `PostgreSQL` | `ranks_com_example_game` |
//! | `player_{safe}` | `PostgreSQL` | `player_com_example_game` |
//! | `leaderboard:{safe}:{category}` | `Dragonfly` sorted set | `leaderboard:com_example_game:weekly` |
//! | `leaderboard_data:{safe}:{category}:{player}` | `Dragonfly` string | per-entry metadata |
//! | `leaderboard_config:{safe}:{category}` | `Dragonfly` string | cached configuration |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest accepted safe id. Keeps `player_{safe}` under the 63-byte
/// `PostgreSQL` identifier limit.
const MAX_SAFE_ID_LEN: usize = 48;

/// Longest accepted category and player identifiers (matches the
/// `VARCHAR(100)` columns).
const MAX_NAME_LEN: usize = 100;

/// Errors raised when a tenant, category, or player identifier is unusable
/// as part of a storage name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The tenant cannot be mapped onto `[A-Za-z0-9_]`.
    #[error("invalid tenant {0:?}")]
    InvalidTenant(String),

    /// The category is empty, too long, or contains a separator.
    #[error("invalid category {0:?}")]
    InvalidCategory(String),

    /// The player identifier is empty, too long, or contains control characters.
    #[error("invalid player id {0:?}")]
    InvalidPlayer(String),
}

/// Map a tenant identifier to its safe storage form.
///
/// `.` and `-` become `_`; anything else outside `[A-Za-z0-9_]` is
/// rejected. The mapping is deterministic and idempotent:
/// `safe_id(safe_id(x)) == safe_id(x)`.
///
/// # Errors
///
/// Returns [`KeyError::InvalidTenant`] for empty input, input longer than
/// 48 characters, or input containing other characters.
pub fn safe_id(tenant: &str) -> Result<String, KeyError> {
    if tenant.is_empty() || tenant.len() > MAX_SAFE_ID_LEN {
        return Err(KeyError::InvalidTenant(tenant.to_owned()));
    }
    tenant
        .chars()
        .map(|c| match c {
            '.' | '-' => Ok('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => Ok(c),
            _ => Err(KeyError::InvalidTenant(tenant.to_owned())),
        })
        .collect()
}

/// A validated tenant (application) identifier.
///
/// Holds both the identifier as supplied by callers and its safe id.
/// Serializes as the original identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId {
    raw: String,
    safe: String,
}

impl TenantId {
    /// Validate a tenant identifier.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidTenant`] if [`safe_id`] rejects it.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let safe = safe_id(raw)?;
        Ok(Self {
            raw: raw.to_owned(),
            safe,
        })
    }

    /// The identifier as supplied by callers.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The sanitized identifier used in every storage name.
    pub fn safe_id(&self) -> &str {
        &self.safe
    }

    /// Name of the tenant's durable rank table.
    pub fn rank_table(&self) -> String {
        format!("ranks_{}", self.safe)
    }

    /// Name of the tenant's player profile table.
    pub fn profile_table(&self) -> String {
        format!("player_{}", self.safe)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for TenantId {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.raw
    }
}

/// Validate a category name.
///
/// # Errors
///
/// Returns [`KeyError::InvalidCategory`] when the name is empty, longer
/// than 100 characters, or contains `:` or whitespace.
pub fn validate_category(category: &str) -> Result<(), KeyError> {
    let bad = category.is_empty()
        || category.len() > MAX_NAME_LEN
        || category.chars().any(|c| c == ':' || c.is_whitespace() || c.is_control());
    if bad {
        return Err(KeyError::InvalidCategory(category.to_owned()));
    }
    Ok(())
}

/// Validate a player identifier.
///
/// # Errors
///
/// Returns [`KeyError::InvalidPlayer`] when the id is empty, longer than
/// 100 characters, or contains control characters.
pub fn validate_player(player_id: &str) -> Result<(), KeyError> {
    if player_id.is_empty()
        || player_id.len() > MAX_NAME_LEN
        || player_id.chars().any(char::is_control)
    {
        return Err(KeyError::InvalidPlayer(player_id.to_owned()));
    }
    Ok(())
}

/// Identifies one leaderboard: a `(tenant, category)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LeaderboardKey {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Category (leaderboard type) within the tenant.
    pub category: String,
}

impl LeaderboardKey {
    /// Build a key from raw identifiers, validating both.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the tenant or category is invalid.
    pub fn parse(tenant: &str, category: &str) -> Result<Self, KeyError> {
        let tenant = TenantId::parse(tenant)?;
        validate_category(category)?;
        Ok(Self {
            tenant,
            category: category.to_owned(),
        })
    }

    /// Build a key from an already validated tenant.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidCategory`] if the category is invalid.
    pub fn new(tenant: TenantId, category: &str) -> Result<Self, KeyError> {
        validate_category(category)?;
        Ok(Self {
            tenant,
            category: category.to_owned(),
        })
    }

    /// Sorted-set key: `leaderboard:{safe}:{category}`.
    pub fn rank_set_key(&self) -> String {
        format!("leaderboard:{}:{}", self.tenant.safe_id(), self.category)
    }

    /// Metadata key: `leaderboard_data:{safe}:{category}:{player}`.
    pub fn metadata_key(&self, player_id: &str) -> String {
        format!(
            "leaderboard_data:{}:{}:{player_id}",
            self.tenant.safe_id(),
            self.category
        )
    }

    /// Version clock key: `leaderboard_clock:{safe}:{category}`.
    pub fn clock_key(&self) -> String {
        format!("leaderboard_clock:{}:{}", self.tenant.safe_id(), self.category)
    }

    /// Config cache key: `leaderboard_config:{safe}:{category}`.
    pub fn config_cache_key(&self) -> String {
        format!("leaderboard_config:{}:{}", self.tenant.safe_id(), self.category)
    }
}

impl fmt::Display for LeaderboardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.category)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn safe_id_maps_dots_and_dashes() {
        assert_eq!(safe_id("com.example-game").unwrap(), "com_example_game");
    }

    #[test]
    fn safe_id_is_idempotent() {
        let once = safe_id("wx.app-01").unwrap();
        let twice = safe_id(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn safe_id_rejects_injection() {
        assert!(safe_id("app; DROP TABLE x").is_err());
        assert!(safe_id("app`name").is_err());
        assert!(safe_id("").is_err());
        assert!(safe_id(&"a".repeat(49)).is_err());
    }

    #[test]
    fn storage_names_derive_from_safe_id() {
        let key = LeaderboardKey::parse("com.game", "weekly_score").unwrap();
        assert_eq!(key.tenant.rank_table(), "ranks_com_game");
        assert_eq!(key.tenant.profile_table(), "player_com_game");
        assert_eq!(key.rank_set_key(), "leaderboard:com_game:weekly_score");
        assert_eq!(key.metadata_key("p1"), "leaderboard_data:com_game:weekly_score:p1");
        assert_eq!(key.config_cache_key(), "leaderboard_config:com_game:weekly_score");
    }

    #[test]
    fn category_rejects_separators() {
        assert!(validate_category("a:b").is_err());
        assert!(validate_category("a b").is_err());
        assert!(validate_category("").is_err());
        assert!(validate_category("weekly").is_ok());
    }

    #[test]
    fn player_rejects_control_chars() {
        assert!(validate_player("p\n1").is_err());
        assert!(validate_player("").is_err());
        assert!(validate_player("open:id-42").is_ok());
    }

    #[test]
    fn tenant_serializes_as_raw_string() {
        let tenant = TenantId::parse("com.game").unwrap();
        assert_eq!(serde_json::to_string(&tenant).unwrap(), "\"com.game\"");
        let back: Result<TenantId, _> = serde_json::from_str("\"bad tenant\"");
        assert!(back.is_err());
    }
}
