//! Viewer-session merge.
//!
//! Folds attendance grants into one [`ViewerRecord`] per lower-cased email.
//! A person who was issued several access keys shows up once, with the
//! union of everything they watched through any of them.
//!
//! Rules:
//!
//! - A grant is identified by its access key; merging the same key twice is
//!   a no-op.
//! - Online minutes are unioned.
//! - Offline minutes are unioned, then every minute also watched live is
//!   removed. Live wins.
//! - Window counters are summed.
//! - The name is the smallest non-empty one among the grants, so it does
//!   not depend on which key is seen first.
//! - Regime and score are recomputed from the resulting minute counts.

use std::collections::BTreeMap;

use crate::model::{Grant, ViewRegime, ViewerRecord};

/// What a score is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scoring {
    /// Event length in minutes.
    pub duration: u32,

    /// Points for watching the whole event.
    pub max_points: u32,
}

impl Scoring {
    /// Points for `minutes` watched.
    ///
    /// Less than a tenth of the event scores nothing. Otherwise the score is
    /// the watched fraction of `max_points`, rounded half up. Integer math
    /// keeps the one-tenth boundary exact.
    pub fn score(self, minutes: usize) -> u32 {
        let minutes = u64::try_from(minutes).unwrap_or(u64::MAX);
        let duration = u64::from(self.duration);
        if duration == 0 || minutes.saturating_mul(10) < duration {
            return 0;
        }
        let max = u64::from(self.max_points);
        let doubled = minutes.saturating_mul(max).saturating_mul(2);
        let points = (doubled + duration) / (2 * duration);
        u32::try_from(points).unwrap_or(u32::MAX)
    }
}

/// Merge `grants` into `viewers`, keyed by lower-cased email.
pub fn merge_into(
    viewers: &mut BTreeMap<String, ViewerRecord>,
    grants: impl IntoIterator<Item = Grant>,
    scoring: Scoring,
) {
    for grant in grants {
        let email = grant.email.to_lowercase();
        viewers
            .entry(email.clone())
            .or_insert_with(|| ViewerRecord {
                email,
                ..ViewerRecord::default()
            })
            .absorb(&grant, scoring);
    }
}

/// Merge `grants` into fresh records.
pub fn merge(
    grants: impl IntoIterator<Item = Grant>,
    scoring: Scoring,
) -> BTreeMap<String, ViewerRecord> {
    let mut viewers = BTreeMap::new();
    merge_into(&mut viewers, grants, scoring);
    viewers
}

impl ViewerRecord {
    /// Fold one grant into this record.
    pub fn absorb(&mut self, grant: &Grant, scoring: Scoring) {
        if !self.keys.insert(grant.key.clone()) {
            return;
        }
        if !grant.name.is_empty() && (self.name.is_empty() || grant.name < self.name) {
            self.name.clone_from(&grant.name);
        }

        self.all_windows += grant.all_windows;
        self.confirmed_windows += grant.confirmed_windows;

        if union_minutes(&mut self.online, &grant.online) {
            self.minutes_online = self.online.len();
            self.first_minute_online = self.online.first().copied();
            self.last_minute_online = self.online.last().copied();
        }

        let added = union_minutes(&mut self.offline, &grant.offline);
        let removed = subtract_minutes(&mut self.offline, &self.online);
        if added || removed {
            self.minutes_offline = self.offline.len();
            self.first_minute_offline = self.offline.first().copied();
            self.last_minute_offline = self.offline.last().copied();
        }

        self.regime = ViewRegime::classify(self.minutes_online, self.minutes_offline);
        self.score = scoring.score(self.minutes_online + self.minutes_offline);
    }
}

// ── Minute sets ──

/// Add `new` to the sorted set `minutes`. Returns whether it grew.
fn union_minutes(minutes: &mut Vec<u32>, new: &[u32]) -> bool {
    let before = minutes.len();
    for &minute in new {
        if let Err(at) = minutes.binary_search(&minute) {
            minutes.insert(at, minute);
        }
    }
    minutes.len() != before
}

/// Remove every minute in the sorted set `other`. Returns whether it shrank.
fn subtract_minutes(minutes: &mut Vec<u32>, other: &[u32]) -> bool {
    if other.is_empty() {
        return false;
    }
    let before = minutes.len();
    minutes.retain(|m| other.binary_search(m).is_err());
    minutes.len() != before
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SCORING: Scoring = Scoring {
        duration: 60,
        max_points: 20,
    };

    fn grant(email: &str, key: &str, online: &[u32], offline: &[u32]) -> Grant {
        Grant {
            email: email.to_string(),
            name: "Viewer".to_string(),
            key: key.to_string(),
            online: online.to_vec(),
            offline: offline.to_vec(),
            all_windows: 2,
            confirmed_windows: 1,
        }
    }

    #[test]
    fn offline_minutes_watched_live_are_dropped() {
        let viewers = merge(
            [
                grant("a@x.org", "k1", &[5, 6], &[]),
                grant("a@x.org", "k2", &[], &[5, 7]),
            ],
            SCORING,
        );

        let record = &viewers["a@x.org"];
        assert_eq!(record.online, vec![5, 6]);
        assert_eq!(record.offline, vec![7]);
        assert_eq!(record.minutes_offline, 1);
        assert_eq!(record.first_minute_offline, Some(7));
        assert_eq!(record.regime, ViewRegime::LiveAndReplay);
    }

    #[test]
    fn later_live_minutes_evict_earlier_replay_minutes() {
        let viewers = merge(
            [
                grant("a@x.org", "k1", &[], &[5, 7]),
                grant("a@x.org", "k2", &[5, 6], &[]),
            ],
            SCORING,
        );
        assert_eq!(viewers["a@x.org"].offline, vec![7]);
    }

    #[test]
    fn emails_are_case_insensitive_identities() {
        let viewers = merge(
            [
                grant("Ada@X.org", "k1", &[1], &[]),
                grant("ada@x.org", "k2", &[2], &[]),
            ],
            SCORING,
        );

        assert_eq!(viewers.len(), 1);
        let record = &viewers["ada@x.org"];
        assert_eq!(record.online, vec![1, 2]);
        assert_eq!(record.all_windows, 4);
        assert_eq!(record.confirmed_windows, 2);
        assert_eq!(record.keys.len(), 2);
    }

    #[test]
    fn same_key_merged_twice_is_a_no_op() {
        let once = merge([grant("a@x.org", "k1", &[1, 2], &[3])], SCORING);
        let twice = merge(
            [
                grant("a@x.org", "k1", &[1, 2], &[3]),
                grant("a@x.org", "k1", &[1, 2], &[3]),
            ],
            SCORING,
        );
        assert_eq!(once, twice);
    }

    #[test]
    fn differing_names_settle_the_same_way_in_any_order() {
        let named = |key: &str, name: &str, minute: u32| Grant {
            name: name.to_string(),
            ..grant("a@x.org", key, &[minute], &[])
        };

        let forward = merge([named("k1", "Ada", 1), named("k2", "Ada L.", 2)], SCORING);
        let backward = merge([named("k2", "Ada L.", 2), named("k1", "Ada", 1)], SCORING);

        assert_eq!(forward, backward);
        assert_eq!(forward["a@x.org"].name, "Ada");

        let unnamed = merge([named("k1", "", 1), named("k2", "Bea", 2)], SCORING);
        assert_eq!(unnamed["a@x.org"].name, "Bea");
    }

    #[test]
    fn nothing_watched_has_no_regime_and_no_score() {
        let viewers = merge([grant("a@x.org", "k1", &[], &[])], SCORING);
        let record = &viewers["a@x.org"];
        assert_eq!(record.regime, ViewRegime::None);
        assert_eq!(record.score, 0);
        assert_eq!(record.first_minute_online, None);
    }

    #[test]
    fn score_boundary_is_exact() {
        let scoring = Scoring {
            duration: 10_000,
            max_points: 20,
        };
        assert_eq!(scoring.score(1_000), 2);
        assert_eq!(scoring.score(999), 0);
    }

    #[test]
    fn score_rounds_half_up() {
        let scoring = Scoring {
            duration: 40,
            max_points: 30,
        };
        // 10 / 40 * 30 = 7.5
        assert_eq!(scoring.score(10), 8);
        // 60 / 60 * 20
        assert_eq!(SCORING.score(60), 20);
    }

    #[test]
    fn zero_duration_scores_nothing() {
        let scoring = Scoring {
            duration: 0,
            max_points: 50,
        };
        assert_eq!(scoring.score(30), 0);
    }

    fn arb_grant() -> impl Strategy<Value = Grant> {
        (
            prop::sample::select(vec!["a@x.org", "b@x.org", "A@X.org"]),
            prop::sample::select(vec!["", "Ada", "Ada L.", "Bea"]),
            0u8..6,
            prop::collection::btree_set(1u32..30, 0..10),
            prop::collection::btree_set(1u32..30, 0..10),
            0u32..4,
        )
            .prop_map(|(email, name, key, online, offline, windows)| Grant {
                email: email.to_string(),
                name: name.to_string(),
                // Keys are unique per email, as the platform issues them.
                key: format!("{}-{key}", email.to_lowercase()),
                online: online.into_iter().collect(),
                offline: offline.into_iter().collect(),
                all_windows: windows,
                confirmed_windows: windows / 2,
            })
    }

    /// The platform reports each key once, so duplicates keep the first.
    fn unique_keys(grants: Vec<Grant>) -> Vec<Grant> {
        let mut seen = std::collections::HashSet::new();
        grants
            .into_iter()
            .filter(|g| seen.insert(g.key.clone()))
            .collect()
    }

    proptest! {
        #[test]
        fn merge_is_order_independent(
            grants in prop::collection::vec(arb_grant(), 0..12).prop_map(unique_keys),
            split in 0usize..12,
        ) {
            let split = split.min(grants.len());
            let (head, tail) = grants.split_at(split);

            let mut forward = BTreeMap::new();
            merge_into(&mut forward, head.to_vec(), SCORING);
            merge_into(&mut forward, tail.to_vec(), SCORING);

            let mut backward = BTreeMap::new();
            merge_into(&mut backward, tail.to_vec(), SCORING);
            merge_into(&mut backward, head.to_vec(), SCORING);

            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn merge_is_idempotent(grants in prop::collection::vec(arb_grant(), 0..12)) {
            let once = merge(grants.clone(), SCORING);

            let mut twice = once.clone();
            merge_into(&mut twice, grants, SCORING);

            prop_assert_eq!(once, twice);
        }

        #[test]
        fn merged_minute_sets_are_sorted_and_disjoint(
            grants in prop::collection::vec(arb_grant(), 0..12),
        ) {
            for record in merge(grants, SCORING).values() {
                prop_assert!(record.online.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(record.offline.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(record.offline.iter().all(|m| !record.online.contains(m)));
                prop_assert_eq!(record.minutes_online, record.online.len());
                prop_assert_eq!(record.minutes_offline, record.offline.len());
            }
        }
    }
}
