//! Webinar event data from the streaming platform.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::ViewerRecord;

/// Event header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    pub name: String,
    pub description: String,
    pub planned_start: Option<Timestamp>,
    pub started: Option<Timestamp>,
    pub ended: Option<Timestamp>,

    /// Broadcast length in whole minutes, rounded up.
    pub duration_minutes: u32,

    pub viewers_max: u32,
    pub viewers_max_at: Option<Timestamp>,

    /// Viewers who watched at least one minute, counted after merging.
    pub viewers_total: u32,
}

/// A registered viewer and the access key issued to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub email: String,
    pub key: String,
}

/// All keys issued for an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub entries: Vec<RosterEntry>,

    /// Keys issued without a ticket (shared or test keys).
    pub single_keys: usize,
}

impl Roster {
    /// Remove entries whose email belongs to one of `domains`.
    pub fn exclude_domains(&mut self, domains: &[String]) {
        if domains.is_empty() {
            return;
        }
        self.entries.retain(|entry| {
            let email = entry.email.to_lowercase();
            !domains
                .iter()
                .any(|domain| email.ends_with(&format!("@{}", domain.to_lowercase())))
        });
    }

    pub fn emails(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.email.clone()).collect()
    }
}

/// The finished webinar attendance report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebinarReport {
    pub name: String,
    pub event: EventInfo,
    pub generated_at: Timestamp,

    /// Keyed by lower-cased email.
    pub viewers: BTreeMap<String, ViewerRecord>,
}
