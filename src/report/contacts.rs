//! Contact report: profile data for a list of emails from one address book.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::FutureExt;

use super::{Result, Services};
use crate::fanout::{FanoutOptions, run_bounded};
use crate::model::Contact;
use crate::remote::Remote;
use crate::remote::mailer::Mailer;
use crate::trace::StageTrace;

pub async fn build<R: Remote + 'static>(
    services: &Services<R>,
    book: Option<&str>,
    emails: Vec<String>,
    trace: &mut StageTrace,
) -> Result<BTreeMap<String, Contact>> {
    let book = services.settings.book(book)?;
    let options = services.settings.fanout("contact lookups");
    lookup(&services.mailer, &options, book, emails, trace).await
}

/// Look up every email in `book`, one request per distinct address.
///
/// Addresses the service refuses come back as contacts carrying a message.
pub async fn lookup<R: Remote + 'static>(
    mailer: &Arc<Mailer<R>>,
    options: &FanoutOptions,
    book: &str,
    emails: Vec<String>,
    trace: &mut StageTrace,
) -> Result<BTreeMap<String, Contact>> {
    let emails: Vec<String> = emails
        .into_iter()
        .filter(|email| !email.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if emails.is_empty() {
        return Ok(BTreeMap::new());
    }

    let titles = Arc::new(mailer.book_titles(book, trace).await?);
    let book: Arc<str> = Arc::from(book);
    let mailer = Arc::clone(mailer);

    let contacts = run_bounded(emails, options, trace, move |email: String, trace| {
        let mailer = Arc::clone(&mailer);
        let titles = Arc::clone(&titles);
        let book = Arc::clone(&book);
        async move { mailer.member(&book, &titles, &email, trace).await }.boxed()
    })
    .await?;

    Ok(contacts.into_iter().collect())
}
