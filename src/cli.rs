//! CLI interface for Muster.
//!
//! Each subcommand builds one report and writes it as JSON to `--out` (if
//! given) or stdout. Fan-out progress and a short summary go to stderr so
//! stdout stays machine-readable. `logins` is the exception: it answers
//! requests on stdout as they arrive.

mod format;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use jiff::Timestamp;
use jiff::civil::Date;
use jiff::tz::TimeZone;
use serde::Serialize;
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::fanout::{DroppedFailures, Progress};
use crate::model::PointsKind;
use crate::registry::WebinarRegistry;
use crate::remote::HttpRemote;
use crate::remote::mailer::Mailer;
use crate::remote::stream::Stream;
use crate::report::login::LoginReply;
use crate::report::update::Rows;
use crate::report::{self, ReportSettings, Services};

/// Muster: reports over mailing lists and webinar attendance.
#[derive(Debug, Parser)]
#[command(name = "muster", version, after_long_help = USAGE_HELP)]
pub struct Cli {
    /// Write the report JSON to this file instead of stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

const USAGE_HELP: &str = r#"Examples:
  muster campaigns --from 2024-03-01 --to 2024-03-31
  muster contacts --book 82599 ada@example.org bea@example.org
  muster webinar f3c9a1 --out attendance.json
  muster webinar f3c9a1 --book 82599 --write-back
  muster certificates --book 82599
  muster points ada@example.org --kind bonus
  muster update --book 82599 fields.json
  muster login f3c9a1 --email ada@example.org --name "Ada Lovelace"
  muster logins < requests.jsonl

Configuration is read from ~/.muster/config.toml."#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Campaigns sent in a date range, with delivery statistics.
    Campaigns {
        /// First day, inclusive (YYYY-MM-DD).
        #[arg(long)]
        from: Date,

        /// Last day, inclusive (YYYY-MM-DD).
        #[arg(long)]
        to: Date,
    },

    /// Profile data for specific emails.
    Contacts {
        /// Address book to read. Defaults to `contacts-book`.
        #[arg(long)]
        book: Option<String>,

        /// Emails to look up.
        #[arg(required = true)]
        emails: Vec<String>,
    },

    /// Attendance report for a webinar.
    ///
    /// Viewers are merged per email across all keys they were issued.
    /// Profile data is attached when an address book is available.
    Webinar {
        /// Event code on the streaming platform.
        event: String,

        /// Address book for viewer profiles. Defaults to `contacts-book`.
        #[arg(long)]
        book: Option<String>,

        /// Also write each viewer's attendance counters into the book.
        #[arg(long)]
        write_back: bool,
    },

    /// Who in an address book is owed a certificate.
    Certificates {
        /// Address book to read. Defaults to `contacts-book`.
        #[arg(long)]
        book: Option<String>,
    },

    /// Points a contact has earned across every address book.
    Points {
        email: String,

        /// Which points to total.
        #[arg(long, value_enum, default_value = "accreditation")]
        kind: PointsKindArg,
    },

    /// Write contact fields into an address book.
    ///
    /// FILE is a JSON object mapping each email to its fields (column title
    /// to value). Contacts are created or overwritten; ones the mailing
    /// service refuses are listed in the output.
    Update {
        /// Address book to write. Defaults to `contacts-book`.
        #[arg(long)]
        book: Option<String>,

        file: PathBuf,
    },

    /// Get (or issue) a personal viewer key for a webinar.
    Login {
        /// Event code on the streaming platform.
        event: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,
    },

    /// Answer login requests from stdin until it closes.
    ///
    /// Each line is a JSON object with `event`, `email` and `name`. Each
    /// answer is one JSON line on stdout. Rosters are kept between requests.
    Logins,
}

/// CLI-facing points kind.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PointsKindArg {
    Accreditation,
    Bonus,
}

impl PointsKindArg {
    fn to_domain(self) -> PointsKind {
        match self {
            Self::Accreditation => PointsKind::Accreditation,
            Self::Bonus => PointsKind::Bonus,
        }
    }
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Campaigns { .. } => "campaigns",
            Self::Contacts { .. } => "contacts",
            Self::Webinar { .. } => "webinar",
            Self::Certificates { .. } => "certificates",
            Self::Points { .. } => "points",
            Self::Update { .. } => "update",
            Self::Login { .. } => "login",
            Self::Logins => "logins",
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli, config: &Config) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {e}"))?;

    let span = tracing::info_span!("command", request = %Uuid::new_v4(), command = cli.command.name());
    runtime.block_on(execute(cli, config).instrument(span))
}

async fn execute(cli: Cli, config: &Config) -> Result<(), String> {
    let (progress, updates) = watch::channel(Progress::default());
    let services = build_services(config, progress)?;
    let reporter = tokio::spawn(show_progress(updates));

    let outcome = dispatch(&cli.command, &services, config).await;

    // Dropping the last progress sender ends the reporter.
    drop(services);
    let _ = reporter.await;

    let (json, summary) = outcome?;
    let Some(json) = json else {
        // Already streamed.
        eprintln!("{summary}");
        return Ok(());
    };
    match cli.out {
        Some(path) => {
            fs::write(&path, &json)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
            eprintln!("{summary} → {}", path.display());
        }
        None => {
            println!("{json}");
            eprintln!("{summary}");
        }
    }
    Ok(())
}

/// Run one command. Returns the JSON to emit (unless the command streamed
/// its own output) and a human summary.
async fn dispatch(
    command: &Command,
    services: &Services<HttpRemote>,
    config: &Config,
) -> Result<(Option<String>, String), String> {
    let (json, summary) = match command {
        Command::Campaigns { from, to } => {
            require(&config.mailer.uri, "mailer.uri")?;
            let name = "campaign report";
            let mut trace = report::begin(name);
            let result = report::campaigns::build(services, *from, *to, &mut trace).await;
            let reports = report::conclude(result, trace, name)?;
            (to_json(&reports)?, format::describe_campaigns(&reports))
        }
        Command::Contacts { book, emails } => {
            require(&config.mailer.uri, "mailer.uri")?;
            let name = "contact report";
            let mut trace = report::begin(name);
            let result =
                report::contacts::build(services, book.as_deref(), emails.clone(), &mut trace)
                    .await;
            let contacts = report::conclude(result, trace, name)?;
            (to_json(&contacts)?, format::describe_contacts(&contacts))
        }
        Command::Webinar {
            event,
            book,
            write_back,
        } => {
            require(&config.stream.uri, "stream.uri")?;
            if *write_back || services.settings.book(book.as_deref()).is_ok() {
                require(&config.mailer.uri, "mailer.uri")?;
            }
            let name = "webinar report";
            let mut trace = report::begin(name);
            let result = report::webinar::build(services, event, book.as_deref(), &mut trace).await;
            let webinar = report::conclude(result, trace, name)?;
            let mut summary = format::describe_webinar(&webinar);

            if *write_back {
                let name = "book update";
                let mut trace = report::begin(name);
                let rows = report::update::attendance_rows(event, &webinar);
                let result = report::update::build(services, book.as_deref(), rows, &mut trace).await;
                let update = report::conclude(result, trace, name)?;
                summary = format!("{summary}; {}", format::describe_update(&update));
            }
            (to_json(&webinar)?, summary)
        }
        Command::Certificates { book } => {
            require(&config.mailer.uri, "mailer.uri")?;
            let name = "certificate report";
            let mut trace = report::begin(name);
            let result = report::certificates::build(services, book.as_deref(), &mut trace).await;
            let info = report::conclude(result, trace, name)?;
            (to_json(&info)?, format::describe_certificates(&info))
        }
        Command::Points { email, kind } => {
            require(&config.mailer.uri, "mailer.uri")?;
            let kind = kind.to_domain();
            let today = Timestamp::now()
                .to_zoned(TimeZone::fixed(services.settings.utc_offset))
                .date();
            let name = "points report";
            let mut trace = report::begin(name);
            let result = report::points::build(services, email, kind, today, &mut trace).await;
            let points = report::conclude(result, trace, name)?;
            (to_json(&points)?, format::describe_points(&points, kind))
        }
        Command::Update { book, file } => {
            require(&config.mailer.uri, "mailer.uri")?;
            let rows = read_rows(file)?;
            let name = "book update";
            let mut trace = report::begin(name);
            let result = report::update::build(services, book.as_deref(), rows, &mut trace).await;
            let update = report::conclude(result, trace, name)?;
            (to_json(&update)?, format::describe_update(&update))
        }
        Command::Login { event, email, name } => {
            require(&config.stream.uri, "stream.uri")?;
            let (registry, stop, pruner) = start_registry(config);

            let report_name = "login";
            let mut trace = report::begin(report_name);
            let result =
                report::login::viewer_key(services, &registry, event, email, name, &mut trace)
                    .await;

            let _ = stop.send(true);
            let _ = pruner.await;

            let key = report::conclude(result, trace, report_name)?;
            let issued = LoginReply::issued(event.clone(), email.clone(), key);
            (to_json(&issued)?, format!("key for {email} on {event}"))
        }
        Command::Logins => {
            require(&config.stream.uri, "stream.uri")?;
            let (registry, stop, pruner) = start_registry(config);

            let input = BufReader::new(tokio::io::stdin());
            let served =
                report::login::serve(services, &registry, input, tokio::io::stdout()).await;

            let _ = stop.send(true);
            let _ = pruner.await;

            let issued = served.map_err(|e| format!("login stream failed: {e}"))?;
            return Ok((None, format!("{issued} key(s) handed out")));
        }
    };
    Ok((Some(json), summary))
}

/// A registry with its pruner running. Send `true` to stop the pruner.
fn start_registry(config: &Config) -> (Arc<WebinarRegistry>, watch::Sender<bool>, JoinHandle<()>) {
    let registry = Arc::new(WebinarRegistry::new(
        config.registry.ttl(),
        config.registry.refresh_after(),
    ));
    let (stop, shutdown) = watch::channel(false);
    let pruner = Arc::clone(&registry).spawn_pruner(config.registry.prune_interval(), shutdown);
    (registry, stop, pruner)
}

fn read_rows(path: &Path) -> Result<Rows, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

fn build_services(
    config: &Config,
    progress: watch::Sender<Progress>,
) -> Result<Services<HttpRemote>, String> {
    let remote = Arc::new(
        HttpRemote::new(config.request_timeout())
            .map_err(|e| format!("failed to build HTTP client: {e}"))?,
    );

    let settings = ReportSettings {
        max_concurrent: config.max_concurrent,
        dropped: if config.log_dropped_failures {
            DroppedFailures::Log
        } else {
            DroppedFailures::Discard
        },
        progress: Some(progress),
        contacts_book: config.contacts_book.clone(),
        excluded_domains: config.excluded_email_domains.clone(),
        utc_offset: config.utc_offset()?,
        key_secret: config.key_secret.clone(),
    };

    Ok(Services {
        mailer: Arc::new(Mailer::new(
            Arc::clone(&remote),
            config.mailer.uri.clone(),
            config.mailer.api_key.clone(),
        )),
        stream: Arc::new(Stream::new(
            remote,
            config.stream.uri.clone(),
            config.stream.uid.clone(),
            config.stream.api_key.clone(),
        )),
        settings,
    })
}

/// Print fan-out progress to stderr until every sender is gone.
async fn show_progress(mut updates: watch::Receiver<Progress>) {
    while updates.changed().await.is_ok() {
        let line = format::progress_line(&updates.borrow_and_update());
        eprintln!("{line}");
    }
}

fn require(uri: &str, key: &str) -> Result<(), String> {
    if uri.is_empty() {
        return Err(format!(
            "{key} is not configured\n\
             Set it in {}",
            Config::path().map_or_else(|| "the config file".to_string(), |p| p.display().to_string())
        ));
    }
    Ok(())
}

fn to_json(value: &impl Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize report: {e}"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_campaign_dates() {
        let cli = Cli::try_parse_from([
            "muster", "campaigns", "--from", "2024-03-01", "--to", "2024-03-31",
        ])
        .unwrap();

        match cli.command {
            Command::Campaigns { from, to } => {
                assert_eq!(from, Date::constant(2024, 3, 1));
                assert_eq!(to, Date::constant(2024, 3, 31));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_dates() {
        let parsed = Cli::try_parse_from(["muster", "campaigns", "--from", "03/01", "--to", "2024-03-31"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn contacts_need_at_least_one_email() {
        assert!(Cli::try_parse_from(["muster", "contacts", "--book", "7"]).is_err());

        let cli = Cli::try_parse_from(["muster", "contacts", "a@example.org", "--out", "c.json"])
            .unwrap();
        assert_eq!(cli.out, Some(PathBuf::from("c.json")));
        assert_eq!(cli.command.name(), "contacts");
    }

    #[test]
    fn points_kind_defaults_to_accreditation() {
        let cli = Cli::try_parse_from(["muster", "points", "ada@example.org"]).unwrap();
        match cli.command {
            Command::Points { email, kind } => {
                assert_eq!(email, "ada@example.org");
                assert_eq!(kind.to_domain(), PointsKind::Accreditation);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli =
            Cli::try_parse_from(["muster", "points", "ada@example.org", "--kind", "bonus"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Points { kind: PointsKindArg::Bonus, .. }
        ));
        assert!(
            Cli::try_parse_from(["muster", "points", "ada@example.org", "--kind", "gold"]).is_err()
        );
    }

    #[test]
    fn webinar_write_back_is_opt_in() {
        let cli = Cli::try_parse_from(["muster", "webinar", "f3c9a1"]).unwrap();
        assert!(matches!(cli.command, Command::Webinar { write_back: false, .. }));

        let cli = Cli::try_parse_from(["muster", "webinar", "f3c9a1", "--write-back"]).unwrap();
        assert!(matches!(cli.command, Command::Webinar { write_back: true, .. }));
    }

    #[test]
    fn update_rows_are_read_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.json");
        fs::write(&path, r#"{"ada@example.org": {"City": "London"}}"#).unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows["ada@example.org"]["City"], "London");

        fs::write(&path, "[1, 2]").unwrap();
        assert!(read_rows(&path).unwrap_err().starts_with("failed to parse"));
        assert!(
            read_rows(&dir.path().join("absent.json"))
                .unwrap_err()
                .starts_with("failed to read")
        );
    }

    #[test]
    fn logins_takes_no_arguments() {
        let cli = Cli::try_parse_from(["muster", "logins"]).unwrap();
        assert_eq!(cli.command.name(), "logins");
        assert!(Cli::try_parse_from(["muster", "logins", "ev1"]).is_err());
    }

    #[test]
    fn unconfigured_service_is_explained() {
        let err = require("", "stream.uri").unwrap_err();
        assert!(err.starts_with("stream.uri is not configured"));
        assert!(require("https://stream.example/", "stream.uri").is_ok());
    }
}
