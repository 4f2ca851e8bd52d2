//! Reports assembled from the mailing service and the streaming platform.
//!
//! Each report runs under a [`StageTrace`] that starts as `start of <report>`
//! and, on failure, is rendered into the single line the user sees.

pub mod campaigns;
pub mod certificates;
pub mod contacts;
pub mod login;
pub mod points;
pub mod update;
pub mod webinar;

use std::sync::Arc;

use jiff::tz::Offset;
use tokio::sync::watch;

use crate::fanout::{DroppedFailures, FanoutError, FanoutOptions, Progress};
use crate::remote::mailer::Mailer;
use crate::remote::stream::Stream;
use crate::remote::{Remote, RemoteError};
use crate::trace::StageTrace;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("unit of work for {key} panicked")]
    Panicked { key: String },

    #[error("invalid date range: {from} is after {to}")]
    DateRange { from: jiff::civil::Date, to: jiff::civil::Date },

    #[error("no address book given and no contacts-book configured")]
    NoBook,

    #[error("required attendee {email} has empty '{field}'")]
    MissingField { email: String, field: &'static str },

    #[error("nobody in the book qualifies for a certificate")]
    NoHolders,

    #[error("no attendee carries the {0}")]
    MissingEventDetail(&'static str),

    #[error("fan-out finished without the {0}")]
    Incomplete(&'static str),
}

pub type Result<T> = core::result::Result<T, ReportError>;

impl From<FanoutError<RemoteError>> for ReportError {
    fn from(error: FanoutError<RemoteError>) -> Self {
        match error {
            FanoutError::Unit(e) => Self::Remote(e),
            FanoutError::Panicked { key } => Self::Panicked { key },
        }
    }
}

impl From<FanoutError<ReportError>> for ReportError {
    fn from(error: FanoutError<ReportError>) -> Self {
        match error {
            FanoutError::Unit(e) => e,
            FanoutError::Panicked { key } => Self::Panicked { key },
        }
    }
}

/// Knobs shared by every report.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Cap on concurrent remote calls within one fan-out.
    pub max_concurrent: usize,
    pub dropped: DroppedFailures,
    pub progress: Option<watch::Sender<Progress>>,
    pub contacts_book: Option<String>,
    pub excluded_domains: Vec<String>,
    /// Offset used to render local times in report names.
    pub utc_offset: Offset,
    pub key_secret: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 300,
            dropped: DroppedFailures::Discard,
            progress: None,
            contacts_book: None,
            excluded_domains: Vec::new(),
            utc_offset: Offset::UTC,
            key_secret: String::new(),
        }
    }
}

impl ReportSettings {
    /// Options for a top-level fan-out, reporting progress.
    pub fn fanout(&self, label: &str) -> FanoutOptions {
        FanoutOptions {
            progress: self.progress.clone(),
            ..self.nested(label)
        }
    }

    /// Options for a fan-out running inside another one's unit of work.
    pub fn nested(&self, label: &str) -> FanoutOptions {
        FanoutOptions {
            dropped: self.dropped,
            ..FanoutOptions::labeled(label).max_concurrent(self.max_concurrent)
        }
    }

    /// The book to read, preferring an explicit one.
    pub fn book<'a>(&'a self, explicit: Option<&'a str>) -> Result<&'a str> {
        explicit
            .or(self.contacts_book.as_deref())
            .filter(|book| !book.is_empty())
            .ok_or(ReportError::NoBook)
    }
}

/// Remote clients plus settings.
#[derive(Debug)]
pub struct Services<R> {
    pub mailer: Arc<Mailer<R>>,
    pub stream: Arc<Stream<R>>,
    pub settings: ReportSettings,
}

/// Start the trace for `report`.
pub fn begin(report: &str) -> StageTrace {
    tracing::info!(report, "report started");
    StageTrace::new(format!("start of {report}"))
}

/// Close the trace and turn a failure into the message shown to the user.
pub fn conclude<T>(
    result: Result<T>,
    mut trace: StageTrace,
    report: &str,
) -> core::result::Result<T, String> {
    trace.finalize(&result, &format!("end of {report}"));
    match result {
        Ok(value) => {
            tracing::info!(report, "report finished");
            Ok(value)
        }
        Err(_) => {
            let message = trace.render_message();
            tracing::info!(report, %message, "report failed");
            Err(message)
        }
    }
}
