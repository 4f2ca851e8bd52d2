//! In-memory registry of viewer keys per webinar.
//!
//! Entries expire after a configurable TTL, extended on every touch. A
//! background pruner sweeps expired entries until told to stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::Roster;

/// Keys known for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKeys {
    /// Lower-cased email to viewer key.
    pub keys: HashMap<String, String>,
    pub refreshed_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(Debug)]
pub struct WebinarRegistry {
    events: Mutex<HashMap<String, EventKeys>>,
    ttl: SignedDuration,
    refresh_after: SignedDuration,
}

fn later(now: Timestamp, by: SignedDuration) -> Timestamp {
    now.checked_add(by).unwrap_or(Timestamp::MAX)
}

impl WebinarRegistry {
    pub fn new(ttl: Duration, refresh_after: Duration) -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            ttl: SignedDuration::try_from(ttl).unwrap_or(SignedDuration::MAX),
            refresh_after: SignedDuration::try_from(refresh_after).unwrap_or(SignedDuration::MAX),
        }
    }

    /// Whether the roster for `event` is missing or older than the refresh window.
    pub fn needs_refresh(&self, event: &str, now: Timestamp) -> bool {
        self.events
            .lock()
            .get(event)
            .is_none_or(|entry| later(entry.refreshed_at, self.refresh_after) <= now)
    }

    /// Replace the known keys for `event` with a freshly fetched roster.
    pub fn replace_roster(&self, event: &str, roster: &Roster, now: Timestamp) {
        let keys = roster
            .entries
            .iter()
            .map(|e| (e.email.to_lowercase(), e.key.clone()))
            .collect();
        self.events.lock().insert(
            event.to_string(),
            EventKeys {
                keys,
                refreshed_at: now,
                expires_at: later(now, self.ttl),
            },
        );
    }

    /// The key issued to `email` for `event`, if any. Extends the entry's TTL.
    pub fn key_for(&self, event: &str, email: &str, now: Timestamp) -> Option<String> {
        let mut events = self.events.lock();
        let entry = events.get_mut(event)?;
        entry.expires_at = later(now, self.ttl);
        entry.keys.get(&email.to_lowercase()).cloned()
    }

    /// Remember a key issued locally.
    pub fn record(&self, event: &str, email: &str, key: String, now: Timestamp) {
        let expires_at = later(now, self.ttl);
        let mut events = self.events.lock();
        let entry = events.entry(event.to_string()).or_insert_with(|| EventKeys {
            keys: HashMap::new(),
            refreshed_at: now,
            expires_at,
        });
        entry.expires_at = expires_at;
        entry.keys.insert(email.to_lowercase(), key);
    }

    /// Drop entries that expired at or before `now`. Returns how many went.
    pub fn prune(&self, now: Timestamp) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|_, entry| entry.expires_at > now);
        before - events.len()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Prune every `interval` until `shutdown` flips to `true` or its sender
    /// goes away.
    pub fn spawn_pruner(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        let pruned = self.prune(Timestamp::now());
                        if pruned > 0 {
                            tracing::debug!(pruned, "pruned expired webinar entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("webinar registry pruner stopped");
        })
    }
}
