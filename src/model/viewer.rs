//! Viewer types: raw attendance grants and the per-identity record they
//! merge into.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Contact;

/// One access key's attendance, as reported by the streaming platform.
///
/// A person can hold several grants for the same event when more than one
/// key was issued to their email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub email: String,
    pub name: String,
    pub key: String,

    /// 1-based minutes watched live. Sorted, no duplicates.
    pub online: Vec<u32>,

    /// 1-based minutes watched as a replay. Sorted, no duplicates.
    pub offline: Vec<u32>,

    /// Presence-check windows shown to this key.
    pub all_windows: u32,

    /// Presence-check windows the viewer confirmed.
    pub confirmed_windows: u32,
}

/// How a viewer watched the event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewRegime {
    Live,
    Replay,
    LiveAndReplay,
    #[default]
    None,
}

impl ViewRegime {
    pub fn classify(online: usize, offline: usize) -> Self {
        match (online > 0, offline > 0) {
            (true, false) => Self::Live,
            (false, true) => Self::Replay,
            (true, true) => Self::LiveAndReplay,
            (false, false) => Self::None,
        }
    }

    /// The label used in serialized output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Replay => "replay",
            Self::LiveAndReplay => "live-and-replay",
            Self::None => "none",
        }
    }

    /// Whether the viewer watched anything at all.
    pub fn watched(self) -> bool {
        self != Self::None
    }
}

/// The merged attendance of one identity (lower-cased email).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerRecord {
    pub email: String,
    pub name: String,

    /// Access keys merged into this record so far.
    pub keys: BTreeSet<String>,

    pub online: Vec<u32>,
    pub minutes_online: usize,
    pub first_minute_online: Option<u32>,
    pub last_minute_online: Option<u32>,

    /// Never overlaps `online`.
    pub offline: Vec<u32>,
    pub minutes_offline: usize,
    pub first_minute_offline: Option<u32>,
    pub last_minute_offline: Option<u32>,

    pub all_windows: u32,
    pub confirmed_windows: u32,

    pub regime: ViewRegime,
    pub score: u32,

    /// Mailing-list profile, filled in by the webinar report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
}

/// Accreditation suffix that may trail a category label.
const ACCREDITED_SUFFIX: &str = "CME";

/// Maximum score for an event category.
///
/// Labels are matched case-insensitively, ignoring a trailing
/// accreditation suffix. Unknown categories score nothing.
pub fn max_points(category: &str) -> u32 {
    let label = category.trim();
    let label = label
        .strip_suffix(ACCREDITED_SUFFIX)
        .map_or(label, str::trim_end)
        .to_lowercase();

    match label.as_str() {
        "webinar" | "interactive school" => 20,
        "round table" | "medical training" => 30,
        "interregional conference" => 40,
        "annual conference" | "partner conference" => 50,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regime_classification() {
        assert_eq!(ViewRegime::classify(3, 0), ViewRegime::Live);
        assert_eq!(ViewRegime::classify(0, 2), ViewRegime::Replay);
        assert_eq!(ViewRegime::classify(1, 1), ViewRegime::LiveAndReplay);
        assert_eq!(ViewRegime::classify(0, 0), ViewRegime::None);
        assert!(!ViewRegime::None.watched());
    }

    #[test]
    fn regime_serializes_kebab_case() {
        let json = serde_json::to_string(&ViewRegime::LiveAndReplay).unwrap();
        assert_eq!(json, "\"live-and-replay\"");
        for regime in [ViewRegime::Live, ViewRegime::Replay, ViewRegime::None] {
            let json = serde_json::to_string(&regime).unwrap();
            assert_eq!(json, format!("\"{}\"", regime.as_str()));
        }
    }

    #[test]
    fn max_points_tiers() {
        assert_eq!(max_points("Webinar"), 20);
        assert_eq!(max_points("Medical training"), 30);
        assert_eq!(max_points("Interregional conference"), 40);
        assert_eq!(max_points("Annual conference"), 50);
    }

    #[test]
    fn max_points_ignores_accreditation_suffix() {
        assert_eq!(max_points("Round table CME"), 30);
        assert_eq!(max_points("  partner conference CME "), 50);
    }

    #[test]
    fn unknown_category_scores_nothing() {
        assert_eq!(max_points("Product launch"), 0);
        assert_eq!(max_points(""), 0);
    }
}
