//! Update-policy decision.
//!
//! Pure function from `(policy, sort, current, proposed)` to what the fast
//! store should do. The chosen [`ScoreWrite`] mode makes the store enforce
//! the same rule atomically, so a concurrent submission that lands between
//! the read and the write cannot be lost (`sum`) or overwritten by a worse
//! score (`max`).

use leaderboard_types::{ScoreWrite, SortDirection, UpdatePolicy};

/// Outcome of applying an update policy to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Write `write`; `score` is the expected resulting score.
    Accept {
        /// Score the entry holds after the write.
        score: i64,
        /// Fast-store write mode.
        write: ScoreWrite,
    },
    /// Leave the entry untouched.
    Reject,
}

/// Decide whether `proposed` is applied and what the entry's score becomes.
///
/// Under `max`, "better" follows `sort`: higher for `desc`, lower for `asc`.
/// Ties are rejected. `sum` saturates at the `i64` bounds.
pub fn decide(
    policy: UpdatePolicy,
    sort: SortDirection,
    current: Option<i64>,
    proposed: i64,
) -> Decision {
    match policy {
        UpdatePolicy::Max => {
            if current.is_none_or(|c| sort.is_better(proposed, c)) {
                Decision::Accept {
                    score: proposed,
                    write: ScoreWrite::Improve {
                        score: proposed,
                        sort,
                    },
                }
            } else {
                Decision::Reject
            }
        }
        UpdatePolicy::Latest => Decision::Accept {
            score: proposed,
            write: ScoreWrite::Set(proposed),
        },
        UpdatePolicy::Sum => Decision::Accept {
            score: current.unwrap_or(0).saturating_add(proposed),
            write: ScoreWrite::Increment(proposed),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn accepted_score(decision: Decision) -> Option<i64> {
        match decision {
            Decision::Accept { score, .. } => Some(score),
            Decision::Reject => None,
        }
    }

    #[test]
    fn max_desc_keeps_the_highest() {
        let d = decide(UpdatePolicy::Max, SortDirection::Desc, Some(100), 90);
        assert_eq!(d, Decision::Reject);
        let d = decide(UpdatePolicy::Max, SortDirection::Desc, Some(100), 100);
        assert_eq!(d, Decision::Reject);
        let d = decide(UpdatePolicy::Max, SortDirection::Desc, Some(100), 120);
        assert_eq!(accepted_score(d), Some(120));
    }

    #[test]
    fn max_asc_keeps_the_lowest() {
        let d = decide(UpdatePolicy::Max, SortDirection::Asc, Some(50), 20);
        assert_eq!(
            d,
            Decision::Accept {
                score: 20,
                write: ScoreWrite::Improve {
                    score: 20,
                    sort: SortDirection::Asc
                }
            }
        );
        assert_eq!(
            decide(UpdatePolicy::Max, SortDirection::Asc, Some(50), 60),
            Decision::Reject
        );
    }

    #[test]
    fn first_submission_is_always_accepted() {
        for policy in [UpdatePolicy::Max, UpdatePolicy::Latest, UpdatePolicy::Sum] {
            for sort in [SortDirection::Asc, SortDirection::Desc] {
                assert_eq!(accepted_score(decide(policy, sort, None, 7)), Some(7));
            }
        }
    }

    #[test]
    fn sum_increments_and_saturates() {
        let d = decide(UpdatePolicy::Sum, SortDirection::Desc, Some(15), -3);
        assert_eq!(
            d,
            Decision::Accept {
                score: 12,
                write: ScoreWrite::Increment(-3)
            }
        );
        let d = decide(UpdatePolicy::Sum, SortDirection::Desc, Some(i64::MAX), 1);
        assert_eq!(accepted_score(d), Some(i64::MAX));
    }

    proptest! {
        #[test]
        fn latest_always_takes_the_proposal(current in proptest::option::of(any::<i64>()), proposed in any::<i64>()) {
            let d = decide(UpdatePolicy::Latest, SortDirection::Desc, current, proposed);
            prop_assert_eq!(accepted_score(d), Some(proposed));
        }

        #[test]
        fn max_result_is_the_better_of_both(current in -1_000_000_i64..1_000_000, proposed in -1_000_000_i64..1_000_000) {
            let desc = accepted_score(decide(UpdatePolicy::Max, SortDirection::Desc, Some(current), proposed))
                .unwrap_or(current);
            prop_assert_eq!(desc, current.max(proposed));

            let asc = accepted_score(decide(UpdatePolicy::Max, SortDirection::Asc, Some(current), proposed))
                .unwrap_or(current);
            prop_assert_eq!(asc, current.min(proposed));
        }

        #[test]
        fn sum_adds(current in -1_000_000_i64..1_000_000, proposed in -1_000_000_i64..1_000_000) {
            let d = decide(UpdatePolicy::Sum, SortDirection::Asc, Some(current), proposed);
            prop_assert_eq!(accepted_score(d), Some(current.saturating_add(proposed)));
        }
    }
}
