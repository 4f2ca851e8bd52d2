//! Streaming-platform client.
//!
//! Requests are form-encoded and authenticated with `uid` plus `api_key`.
//! A refused request comes back as `{"error": "..."}` with a success status,
//! so every body is checked for that shape before decoding.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use jiff::Timestamp;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{Method, Payload, Remote, RemoteError, Request, Result, exchange};
use crate::model::{EventInfo, Grant, Roster, RosterEntry};
use crate::trace::StageTrace;

// ── Wire types ──

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireEvent {
    name: String,
    description: String,
    date_plan_start: String,
    date_real_start: String,
    date_real_end: String,
    /// Seconds.
    duration_total: u64,
    viewers_max: u32,
    time_viewers_max: String,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    id: i64,
    #[serde(default)]
    fio: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct Key {
    ticket_id: i64,
    password: String,
}

#[derive(Debug, Deserialize)]
struct VisitStats {
    password: String,
    #[serde(default)]
    histogram: Vec<Minute>,
}

#[derive(Debug, Deserialize)]
struct Minute {
    /// 0-based.
    position: u32,
    #[serde(default)]
    views: Vec<View>,
}

#[derive(Debug, Deserialize)]
struct View {
    #[serde(default)]
    is_live: bool,
}

#[derive(Debug, Deserialize)]
struct Window {
    password: String,
    #[serde(default)]
    confirmed: i64,
}

#[derive(Debug, Deserialize)]
struct InsertReply {
    #[serde(default)]
    success: bool,
}

/// Fail on an `{"error": ...}` body.
fn check_refusal(body: &[u8]) -> Result<()> {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody { error }) if !error.is_empty() => Err(RemoteError::Refused(error)),
        _ => Ok(()),
    }
}

fn timestamp(raw: &str) -> Option<Timestamp> {
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(ts) => Some(ts),
        Err(e) => {
            tracing::debug!(raw, error = %e, "unparseable platform timestamp");
            None
        }
    }
}

// ── Client ──

/// Streaming-platform client.
#[derive(Debug)]
pub struct Stream<R> {
    remote: Arc<R>,
    uri: String,
    uid: String,
    api_key: String,
}

impl<R: Remote> Stream<R> {
    pub fn new(
        remote: Arc<R>,
        uri: impl Into<String>,
        uid: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            uri: uri.into(),
            uid: uid.into(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: Method, path: &str, event: &str, extra: &[(&str, &str)]) -> Request {
        let mut visible = vec![("event_code".to_string(), event.to_string())];
        visible.extend(extra.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())));

        let redacted = visible
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut pairs = vec![
            ("uid".to_string(), self.uid.clone()),
            ("api_key".to_string(), self.api_key.clone()),
        ];
        pairs.extend(visible);

        Request {
            operation: path.to_string(),
            method,
            url: format!("{}{path}", self.uri),
            payload: Payload::Form(pairs),
            redacted: redacted.into_bytes(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        event: &str,
        extra: &[(&str, &str)],
        trace: &mut StageTrace,
    ) -> Result<T> {
        let request = self.request(method, path, event, extra);
        let body = exchange(&*self.remote, &request, trace).await?;

        trace.set_last_stage(format!("decode {path}"));
        check_refusal(&body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Event header. Duration is converted to minutes, rounded up.
    pub async fn event(&self, event: &str, trace: &mut StageTrace) -> Result<EventInfo> {
        trace.enter_stage("event header");
        let result = self
            .call::<WireEvent>(Method::Get, "v1/get_event", event, &[], trace)
            .await
            .map(|wire| EventInfo {
                name: wire.name,
                description: wire.description,
                planned_start: timestamp(&wire.date_plan_start),
                started: timestamp(&wire.date_real_start),
                ended: timestamp(&wire.date_real_end),
                duration_minutes: u32::try_from(wire.duration_total.div_ceil(60))
                    .unwrap_or(u32::MAX),
                viewers_max: wire.viewers_max,
                viewers_max_at: timestamp(&wire.time_viewers_max),
                viewers_total: 0,
            });
        trace.pop_stage_on_success(&result);
        result
    }

    /// Tickets paired with the keys issued for them.
    ///
    /// Keys without a ticket are counted, not listed. Tickets without an
    /// email were created by hand on the platform and are skipped.
    pub async fn roster(&self, event: &str, trace: &mut StageTrace) -> Result<Roster> {
        trace.enter_stage("event roster");
        let result: Result<Roster> = async {
            let tickets: Vec<Ticket> = self
                .call(Method::Post, "v1/get_event_tickets", event, &[], trace)
                .await?;
            let keys: Vec<Key> = self
                .call(Method::Post, "v1/get_event_keys", event, &[], trace)
                .await?;

            trace.set_last_stage("pair tickets with keys");
            pair(&tickets, keys)
        }
        .await;
        trace.pop_stage_on_success(&result);
        result
    }

    /// Attendance for every roster entry: minutes watched and presence
    /// windows confirmed.
    pub async fn activity(
        &self,
        event: &str,
        roster: &Roster,
        trace: &mut StageTrace,
    ) -> Result<Vec<Grant>> {
        trace.enter_stage("viewer activity");
        let result: Result<Vec<Grant>> = async {
            let visits: Vec<VisitStats> = self
                .call(Method::Post, "v1/get_visit_stats", event, &[], trace)
                .await?;
            let windows: Vec<Window> = self
                .call(
                    Method::Post,
                    "v1/get_user_activity_detailed_all",
                    event,
                    &[],
                    trace,
                )
                .await?;

            trace.set_last_stage("attribute activity");
            Ok(attribute(roster, &visits, &windows))
        }
        .await;
        trace.pop_stage_on_success(&result);
        result
    }

    /// Register a personal viewer key on the platform.
    pub async fn insert_key(
        &self,
        event: &str,
        name: &str,
        email: &str,
        key: &str,
        trace: &mut StageTrace,
    ) -> Result<()> {
        trace.enter_stage("key insert");
        let extra = [("name", name), ("email", email), ("key", key), ("multiple_vpp", "0")];
        let result = self
            .call::<InsertReply>(Method::Post, "v1/insert_key", event, &extra, trace)
            .await
            .and_then(|reply| {
                if reply.success {
                    Ok(())
                } else {
                    Err(RemoteError::Refused("key was not accepted".to_string()))
                }
            });
        trace.pop_stage_on_success(&result);
        result
    }
}

fn pair(tickets: &[Ticket], keys: Vec<Key>) -> Result<Roster> {
    let by_id: HashMap<i64, &Ticket> = tickets
        .iter()
        .filter(|t| !t.email.is_empty())
        .map(|t| (t.id, t))
        .collect();
    let service_tickets = tickets
        .iter()
        .filter(|t| t.email.is_empty())
        .map(|t| t.id)
        .collect::<HashSet<_>>()
        .len();

    let mut roster = Roster::default();
    let mut unpaired = 0;
    let total_keys = keys.len();
    for key in keys {
        if key.ticket_id == 0 {
            roster.single_keys += 1;
            continue;
        }
        match by_id.get(&key.ticket_id) {
            Some(ticket) => roster.entries.push(RosterEntry {
                name: ticket.fio.clone(),
                email: ticket.email.clone(),
                key: key.password,
            }),
            None => unpaired += 1,
        }
    }

    let ticketed = tickets.len() - service_tickets;
    let issued = total_keys - roster.single_keys;
    if ticketed != issued {
        return Err(RemoteError::Shape(format!(
            "tickets and keys do not pair up: {} tickets ({service_tickets} without email), \
             {total_keys} keys ({} single, {unpaired} unpaired)",
            tickets.len(),
            roster.single_keys,
        )));
    }
    Ok(roster)
}

fn attribute(roster: &Roster, visits: &[VisitStats], windows: &[Window]) -> Vec<Grant> {
    let histograms: HashMap<&str, &[Minute]> = visits
        .iter()
        .map(|v| (v.password.as_str(), v.histogram.as_slice()))
        .collect();

    let mut confirmations: HashMap<&str, (u32, u32)> = HashMap::new();
    for window in windows {
        let (all, confirmed) = confirmations.entry(window.password.as_str()).or_default();
        *all += 1;
        if window.confirmed == 1 {
            *confirmed += 1;
        }
    }

    roster
        .entries
        .iter()
        .map(|entry| {
            let mut grant = Grant {
                email: entry.email.clone(),
                name: entry.name.clone(),
                key: entry.key.clone(),
                ..Grant::default()
            };

            for minute in histograms.get(entry.key.as_str()).copied().unwrap_or_default() {
                let Some(first) = minute.views.first() else {
                    continue;
                };
                let Some(position) = minute.position.checked_add(1) else {
                    tracing::warn!(key = %entry.key, "minute position out of range, skipped");
                    continue;
                };
                if first.is_live {
                    grant.online.push(position);
                } else {
                    grant.offline.push(position);
                }
            }
            grant.online.sort_unstable();
            grant.online.dedup();
            grant.offline.sort_unstable();
            grant.offline.dedup();

            if let Some(&(all, confirmed)) = confirmations.get(entry.key.as_str()) {
                grant.all_windows = all;
                grant.confirmed_windows = confirmed;
            }
            grant
        })
        .collect()
}
