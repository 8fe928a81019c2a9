//! Player profiles and the projected leaderboard view.
//!
//! Profiles belong to the profile subsystem; the leaderboard only reads
//! them. A profile row holds one JSON document whose well-known fields
//! are lifted into the view; everything else stays in the raw `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::{PlayerMeta, RankedEntry};

/// Well-known fields of a profile document. Missing fields default to
/// empty strings and zeros.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Profile {
    /// Session token.
    pub token: String,
    /// Display name.
    pub nickname: String,
    /// Avatar URL.
    pub avatar: String,
    /// Player level.
    pub level: i64,
    /// Experience points.
    pub exp: i64,
    /// Soft currency.
    pub coin: i64,
    /// Hard currency.
    pub diamond: i64,
    /// VIP tier.
    pub vip_level: i64,
}

impl Profile {
    /// Parse a profile document, returning the lifted fields and the raw JSON.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed JSON or mistyped well-known fields.
    pub fn parse(raw: &str) -> Result<(Self, Value), serde_json::Error> {
        let data: Value = serde_json::from_str(raw)?;
        let profile = Self::deserialize(&data)?;
        Ok((profile, data))
    }
}

/// One entry of a leaderboard joined with its metadata and profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardView {
    /// 1-based rank.
    pub rank: u64,
    /// Player identifier.
    pub player_id: String,
    /// Score.
    pub score: i64,
    /// Game-specific submission fields.
    pub extra_data: Value,
    /// First acceptance time, if metadata is present.
    pub created_at: Option<DateTime<Utc>>,
    /// Latest acceptance time, if metadata is present.
    pub updated_at: Option<DateTime<Utc>>,
    /// Profile token.
    pub token: String,
    /// Profile nickname.
    pub nickname: String,
    /// Profile avatar.
    pub avatar: String,
    /// Raw profile document (`null` when absent).
    pub data: Value,
    /// Profile level.
    pub level: i64,
    /// Profile experience.
    pub exp: i64,
    /// Profile coins.
    pub coin: i64,
    /// Profile diamonds.
    pub diamond: i64,
    /// Profile VIP tier.
    pub vip_level: i64,
}

impl LeaderboardView {
    /// Merge a ranked entry with its (optional) metadata and profile.
    pub fn assemble(
        entry: RankedEntry,
        meta: Option<PlayerMeta>,
        profile: Profile,
        data: Value,
    ) -> Self {
        let (extra_data, created_at, updated_at) = meta.map_or((Value::Null, None, None), |m| {
            (m.extra_data, m.created_at, m.updated_at)
        });
        Self {
            rank: entry.rank,
            player_id: entry.player_id,
            score: entry.score,
            extra_data,
            created_at,
            updated_at,
            token: profile.token,
            nickname: profile.nickname,
            avatar: profile.avatar,
            data,
            level: profile.level,
            exp: profile.exp,
            coin: profile.coin,
            diamond: profile.diamond,
            vip_level: profile.vip_level,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_lifts_known_fields_and_keeps_raw() {
        let (profile, data) =
            Profile::parse(r#"{"nickname":"alice","level":7,"vipLevel":2,"pets":["cat"]}"#).unwrap();
        assert_eq!(profile.nickname, "alice");
        assert_eq!(profile.level, 7);
        assert_eq!(profile.vip_level, 2);
        assert_eq!(profile.coin, 0);
        assert_eq!(data["pets"][0], "cat");
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(Profile::parse("{nickname:").is_err());
        assert!(Profile::parse(r#"{"level":"seven"}"#).is_err());
    }

    #[test]
    fn assemble_without_metadata_uses_nulls() {
        let entry = RankedEntry {
            rank: 3,
            player_id: "p".to_owned(),
            score: 9,
        };
        let view = LeaderboardView::assemble(entry, None, Profile::default(), Value::Null);
        assert_eq!(view.rank, 3);
        assert_eq!(view.nickname, "");
        assert_eq!(view.level, 0);
        assert!(view.created_at.is_none());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("vipLevel").is_some());
        assert!(json.get("extraData").is_some());
    }
}
