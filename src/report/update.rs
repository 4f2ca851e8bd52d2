//! Write-back: push per-contact fields into an address book.
//!
//! One `lists.add_member` upsert per email. A contact the service refuses
//! (invalid address, blacklisted, ...) is recorded and the batch goes on;
//! transport failures and malformed replies stop it.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;

use super::{Result, Services};
use crate::fanout::run_bounded;
use crate::model::{BookUpdate, WebinarReport};
use crate::remote::{Remote, RemoteError};
use crate::trace::StageTrace;

/// Email to column title to value.
pub type Rows = BTreeMap<String, BTreeMap<String, String>>;

pub async fn build<R: Remote + 'static>(
    services: &Services<R>,
    book: Option<&str>,
    rows: Rows,
    trace: &mut StageTrace,
) -> Result<BookUpdate> {
    let book = services.settings.book(book)?;
    let emails: Vec<String> = rows.keys().filter(|e| !e.is_empty()).cloned().collect();
    if emails.is_empty() {
        return Ok(BookUpdate::default());
    }

    let titles = Arc::new(services.mailer.book_titles(book, trace).await?);
    let mailer = Arc::clone(&services.mailer);
    let book: Arc<str> = Arc::from(book);
    let rows = Arc::new(rows);

    let outcomes = run_bounded(
        emails,
        &services.settings.fanout("contact updates"),
        trace,
        move |email: String, trace| {
            let mailer = Arc::clone(&mailer);
            let titles = Arc::clone(&titles);
            let book = Arc::clone(&book);
            let rows = Arc::clone(&rows);
            async move {
                let Some(fields) = rows.get(&email) else {
                    return Ok(None);
                };
                match mailer.add_member(&book, &titles, &email, fields, trace).await {
                    Ok(()) => Ok(None),
                    Err(
                        e @ (RemoteError::Service { .. } | RemoteError::UnknownServiceCode { .. }),
                    ) => Ok(Some(e.to_string())),
                    Err(e) => Err(e),
                }
            }
            .boxed()
        },
    )
    .await?;

    let mut update = BookUpdate::default();
    for (email, refusal) in outcomes {
        match refusal {
            None => update.written += 1,
            Some(reason) => {
                tracing::warn!(%email, %reason, "contact not written");
                update.rejected.insert(email, reason);
            }
        }
    }
    Ok(update)
}

/// Attendance columns for every viewer of `report`, ready to write back.
pub fn attendance_rows(event: &str, report: &WebinarReport) -> Rows {
    report
        .viewers
        .iter()
        .map(|(email, viewer)| {
            let fields = BTreeMap::from([
                ("event_code".to_string(), event.to_string()),
                ("windows_shown".to_string(), viewer.all_windows.to_string()),
                ("windows_confirmed".to_string(), viewer.confirmed_windows.to_string()),
                ("minutes_online".to_string(), viewer.minutes_online.to_string()),
                ("minutes_offline".to_string(), viewer.minutes_offline.to_string()),
                ("points_for_viewing".to_string(), viewer.score.to_string()),
                ("view_regime".to_string(), viewer.regime.as_str().to_string()),
            ]);
            (email.clone(), fields)
        })
        .collect()
}
