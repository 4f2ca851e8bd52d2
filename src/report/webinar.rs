//! Webinar attendance report.
//!
//! Two rounds of fan-out against the streaming platform and the mailing
//! service:
//!
//! ```text
//! {header, roster} ──► drop excluded domains ──► {activity, contacts}
//!                                                     │        └─ one lookup per email
//!                                                     ▼
//!                                            merge grants per email
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use jiff::Timestamp;
use jiff::tz::{Offset, TimeZone};

use super::{ReportError, Result, Services, contacts};
use crate::fanout::run_bounded;
use crate::merge::{Scoring, merge};
use crate::model::{Contact, EventInfo, Grant, Roster, WebinarReport, max_points};
use crate::remote::Remote;
use crate::trace::StageTrace;

/// First round: what the event is and who holds keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    Header,
    Roster,
}

/// Second round: what the key holders did and who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Detail {
    Activity,
    Contacts,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::Roster => "roster",
        })
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Activity => "activity",
            Self::Contacts => "contacts",
        })
    }
}

enum Fetched {
    Header(EventInfo),
    Roster(Roster),
    Activity(Vec<Grant>),
    Contacts(BTreeMap<String, Contact>),
}

#[derive(Default)]
struct Gathered {
    event: Option<EventInfo>,
    roster: Option<Roster>,
    grants: Option<Vec<Grant>>,
    contacts: BTreeMap<String, Contact>,
}

impl Gathered {
    fn gather<K>(&mut self, parts: HashMap<K, Fetched>) {
        for fetched in parts.into_values() {
            match fetched {
                Fetched::Header(event) => self.event = Some(event),
                Fetched::Roster(roster) => self.roster = Some(roster),
                Fetched::Activity(grants) => self.grants = Some(grants),
                Fetched::Contacts(contacts) => self.contacts = contacts,
            }
        }
    }
}

pub async fn build<R: Remote + 'static>(
    services: &Services<R>,
    event: &str,
    book: Option<&str>,
    trace: &mut StageTrace,
) -> Result<WebinarReport> {
    let settings = &services.settings;
    let event_id: Arc<str> = Arc::from(event);
    let mut gathered = Gathered::default();

    let stream = Arc::clone(&services.stream);
    let id = Arc::clone(&event_id);
    let sources = run_bounded(
        vec![Source::Header, Source::Roster],
        &settings.fanout("event header and roster"),
        trace,
        move |source: Source, trace| {
            let stream = Arc::clone(&stream);
            let id = Arc::clone(&id);
            async move {
                match source {
                    Source::Header => stream.event(&id, trace).await.map(Fetched::Header),
                    Source::Roster => stream.roster(&id, trace).await.map(Fetched::Roster),
                }
            }
            .boxed()
        },
    )
    .await?;
    gathered.gather(sources);

    let mut roster = gathered
        .roster
        .take()
        .ok_or(ReportError::Incomplete("roster"))?;
    let before = roster.entries.len();
    roster.exclude_domains(&settings.excluded_domains);
    tracing::debug!(
        event,
        viewers = roster.entries.len(),
        excluded = before - roster.entries.len(),
        "roster loaded"
    );

    // Without an address book there is nobody to look up.
    let book: Option<Arc<str>> = settings.book(book).ok().map(Arc::from);
    let mut details = vec![Detail::Activity];
    if book.is_some() {
        details.push(Detail::Contacts);
    }

    let roster = Arc::new(roster);
    let stream = Arc::clone(&services.stream);
    let mailer = Arc::clone(&services.mailer);
    let lookups = settings.nested("contact lookups");
    let id = Arc::clone(&event_id);
    let shared_roster = Arc::clone(&roster);
    let found = run_bounded(
        details,
        &settings.fanout("viewer activity and contacts"),
        trace,
        move |detail: Detail, trace| {
            let stream = Arc::clone(&stream);
            let mailer = Arc::clone(&mailer);
            let lookups = lookups.clone();
            let id = Arc::clone(&id);
            let roster = Arc::clone(&shared_roster);
            let book = book.clone();
            async move {
                match (detail, book) {
                    (Detail::Activity, _) => stream
                        .activity(&id, &roster, trace)
                        .await
                        .map(Fetched::Activity)
                        .map_err(ReportError::from),
                    (Detail::Contacts, Some(book)) => {
                        let emails = roster
                            .entries
                            .iter()
                            .map(|entry| entry.email.to_lowercase())
                            .collect();
                        contacts::lookup(&mailer, &lookups, &book, emails, trace)
                            .await
                            .map(Fetched::Contacts)
                    }
                    (Detail::Contacts, None) => Ok(Fetched::Contacts(BTreeMap::new())),
                }
            }
            .boxed()
        },
    )
    .await?;
    gathered.gather(found);

    let mut event = gathered.event.ok_or(ReportError::Incomplete("event header"))?;
    let grants = gathered.grants.ok_or(ReportError::Incomplete("viewer activity"))?;

    let scoring = Scoring {
        duration: event.duration_minutes,
        max_points: max_points(&event.name),
    };
    let mut viewers = merge(grants, scoring);

    let mut contacts = gathered.contacts;
    for (email, viewer) in &mut viewers {
        if let Some(contact) = contacts.remove(email) {
            if !contact.name.is_empty() {
                viewer.name.clone_from(&contact.name);
            }
            viewer.contact = Some(contact);
        }
    }

    let watched = viewers.values().filter(|v| v.regime.watched()).count();
    event.viewers_total = u32::try_from(watched).unwrap_or(u32::MAX);

    Ok(WebinarReport {
        name: report_name(event.planned_start, settings.utc_offset),
        event,
        generated_at: Timestamp::now(),
        viewers,
    })
}

/// `Report DD.MM.YYYY HH.MM` at the planned start, in local time.
///
/// Dots instead of colons so the name works as a file name.
fn report_name(planned_start: Option<Timestamp>, offset: Offset) -> String {
    match planned_start {
        Some(start) => {
            let local = start.to_zoned(TimeZone::fixed(offset));
            format!("Report {}", local.strftime("%d.%m.%Y %H.%M"))
        }
        None => "Report".to_string(),
    }
}
