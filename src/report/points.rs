//! Points report: what one contact has earned across every address book.
//!
//! Each book holds at most one row per email, describing the event that book
//! was collected for. The report reads that row from every book, then totals
//! the points for the current year and quarter.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use jiff::civil::Date;

use super::{Result, Services};
use crate::fanout::run_bounded;
use crate::model::{Contact, PointsEntry, PointsKind, PointsSummary};
use crate::remote::Remote;
use crate::trace::StageTrace;

/// Accepted spellings of an event date.
const DATE_FORMATS: [&str; 3] = ["%d.%m.%Y", "%Y-%m-%d", "%d %B %Y"];

pub async fn build<R: Remote + 'static>(
    services: &Services<R>,
    email: &str,
    kind: PointsKind,
    today: Date,
    trace: &mut StageTrace,
) -> Result<PointsSummary> {
    let books = services.mailer.books(trace).await?;

    let mailer = Arc::clone(&services.mailer);
    let email: Arc<str> = Arc::from(email.to_lowercase());
    let rows = run_bounded(
        books,
        &services.settings.fanout("book lookups"),
        trace,
        move |book: String, trace| {
            let mailer = Arc::clone(&mailer);
            let email = Arc::clone(&email);
            async move {
                let titles = mailer.book_titles(&book, trace).await?;
                mailer.member(&book, &titles, &email, trace).await
            }
            .boxed()
        },
    )
    .await?;

    Ok(total(rows.into_iter().collect(), kind, today))
}

/// Sum the points in `rows` (book to contact row) for the year and quarter
/// of `today`.
///
/// Accreditation entries are listed for every event; bonus entries only for
/// events in the current quarter.
fn total(rows: BTreeMap<String, Contact>, kind: PointsKind, today: Date) -> PointsSummary {
    let mut summary = PointsSummary::default();

    for (book, row) in rows {
        // Not in this book.
        if !row.message.is_empty() {
            continue;
        }
        let points = match kind {
            PointsKind::Accreditation if earned(&row.accreditation_code) => {
                amount(&row.credits, "credit_units")
            }
            PointsKind::Bonus
                if earned(&row.points_view)
                    || earned(&row.points_question)
                    || earned(&row.points_poll) =>
            {
                amount(&row.points_view, "points_for_viewing")
                    .saturating_add(amount(&row.points_question, "points_for_question"))
                    .saturating_add(amount(&row.points_poll, "points_for_poll"))
            }
            _ => continue,
        };

        let day = event_day(&row.event_date);
        let in_year = day.is_some_and(|d| d.year() == today.year());
        let in_quarter = in_year && day.is_some_and(|d| quarter(d) == quarter(today));
        if in_year {
            summary.year_points = summary.year_points.saturating_add(points);
        }
        if in_quarter {
            summary.quarter_points = summary.quarter_points.saturating_add(points);
        }

        if kind == PointsKind::Accreditation || in_quarter {
            summary.entries.push(entry(book, row, kind));
        }
    }
    summary
}

fn entry(book: String, row: Contact, kind: PointsKind) -> PointsEntry {
    let mut entry = PointsEntry {
        book,
        event_date: row.event_date,
        event_name: row.event_name,
        ..PointsEntry::default()
    };
    match kind {
        PointsKind::Accreditation => {
            entry.accreditation_code = row.accreditation_code;
            entry.credits = row.credits;
            entry.certificate = row.certificate;
        }
        PointsKind::Bonus => {
            entry.points_view = row.points_view;
            entry.points_question = row.points_question;
            entry.points_poll = row.points_poll;
        }
    }
    entry
}

/// Whether a points column records anything.
fn earned(raw: &str) -> bool {
    let raw = raw.trim();
    !raw.is_empty() && raw != "0"
}

fn amount(raw: &str, column: &str) -> u32 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(column, value = raw, "points value is not a whole number, counted as 0");
        0
    })
}

fn event_day(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| Date::strptime(format, raw).ok())
}

fn quarter(day: Date) -> i8 {
    (day.month() - 1) / 3 + 1
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::remote::RemoteError;
    use crate::remote::testing::ScriptedRemote;
    use crate::report::ReportError;
    use crate::report::fixtures::{envelope, services};

    const TODAY: Date = Date::constant(2024, 5, 20);

    fn row(date: &str, code: &str, credits: &str, view: &str) -> Contact {
        Contact {
            event_date: date.to_string(),
            event_name: format!("Event on {date}"),
            accreditation_code: code.to_string(),
            credits: credits.to_string(),
            points_view: view.to_string(),
            ..Contact::default()
        }
    }

    fn rows() -> BTreeMap<String, Contact> {
        BTreeMap::from([
            ("1".to_string(), row("15.05.2024", "NMO-1", "6", "10")),
            ("2".to_string(), row("2024-02-01", "NMO-2", "4", "5")),
            ("3".to_string(), row("01 April 2023", "NMO-3", "8", "20")),
            ("4".to_string(), row("20.06.2024", "0", "3", "0")),
            ("5".to_string(), Contact::unreadable("no such subscriber")),
        ])
    }

    #[test]
    fn accreditation_totals_by_year_and_quarter() {
        let summary = total(rows(), PointsKind::Accreditation, TODAY);

        assert_eq!(summary.year_points, 10);
        assert_eq!(summary.quarter_points, 6);
        let books: Vec<_> = summary.entries.iter().map(|e| e.book.as_str()).collect();
        assert_eq!(books, ["1", "2", "3"]);
        assert_eq!(summary.entries[0].credits, "6");
        assert!(summary.entries[0].points_view.is_empty());
    }

    #[test]
    fn bonus_lists_only_this_quarter() {
        let summary = total(rows(), PointsKind::Bonus, TODAY);

        assert_eq!(summary.year_points, 15);
        assert_eq!(summary.quarter_points, 10);
        assert_eq!(summary.entries.len(), 1);
        assert_eq!(summary.entries[0].points_view, "10");
        assert!(summary.entries[0].credits.is_empty());
    }

    #[test]
    fn garbage_points_count_as_zero() {
        let rows = BTreeMap::from([("1".to_string(), row("15.05.2024", "NMO-1", "six", ""))]);
        let summary = total(rows, PointsKind::Accreditation, TODAY);

        assert_eq!(summary.year_points, 0);
        assert_eq!(summary.entries.len(), 1);
    }

    #[test]
    fn undated_events_are_listed_but_not_counted() {
        let rows = BTreeMap::from([("1".to_string(), row("someday", "NMO-1", "6", ""))]);
        let summary = total(rows, PointsKind::Accreditation, TODAY);

        assert_eq!((summary.year_points, summary.quarter_points), (0, 0));
        assert_eq!(summary.entries.len(), 1);
    }

    fn titles() -> String {
        envelope(
            0,
            &json!([{
                "merge_1": "{\"title\":\"Event_Date\"}",
                "merge_2": "{\"title\":\"Accreditation_Code\"}",
                "merge_3": "{\"title\":\"Credit_Units\"}",
            }]),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_one_row_per_book() {
        let (services, remote) = services(
            ScriptedRemote::new()
                .reply_when("lists.get", "list_id", "7", titles())
                .reply_when("lists.get", "list_id", "8", titles())
                .reply("lists.get", envelope(0, &json!([{ "id": "7" }, { "id": "8" }])))
                .reply_when(
                    "lists.get_members",
                    "list_id",
                    "7",
                    envelope(
                        0,
                        &json!([{ "merge_1": "10.04.2024", "merge_2": "A-1", "merge_3": "5" }]),
                    ),
                )
                .reply("lists.get_members", envelope(9, &json!([]))),
        );
        let mut trace = StageTrace::new("start of points report");

        let summary = build(
            &services,
            "Ada@Example.org",
            PointsKind::Accreditation,
            TODAY,
            &mut trace,
        )
        .await
        .unwrap();

        assert_eq!((summary.year_points, summary.quarter_points), (5, 5));
        assert_eq!(summary.entries.len(), 1);
        assert_eq!(summary.entries[0].book, "7");

        let lookups = remote.sent("lists.get_members");
        assert_eq!(lookups.len(), 2);
        assert!(
            lookups
                .iter()
                .all(|r| r.param("email").as_deref() == Some("ada@example.org"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_book_fails_the_report() {
        let (services, _) = services(
            ScriptedRemote::new()
                .reply_when("lists.get", "list_id", "7", titles())
                .reply("lists.get", envelope(0, &json!([{ "id": "7" }])))
                .status("lists.get_members", 502, "bad gateway"),
        );
        let mut trace = StageTrace::new("start of points report");

        let err = build(&services, "ada@example.org", PointsKind::Bonus, TODAY, &mut trace)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReportError::Remote(RemoteError::Status { status: 502, .. })
        ));
        assert!(trace.contains("book lookups"));
        assert!(trace.contains("work item 7"));
    }
}
