//! Muster configuration.
//!
//! Loaded from `~/.muster/config.toml`. Defaults apply when the file is
//! missing. Secrets may come from the environment instead of the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jiff::tz::Offset;
use serde::{Deserialize, Serialize};

/// Environment variables that override secrets.
const SECRET_OVERRIDES: [&str; 4] = [
    "MUSTER_MAILER_API_KEY",
    "MUSTER_STREAM_UID",
    "MUSTER_STREAM_API_KEY",
    "MUSTER_KEY_SECRET",
];

/// Muster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Cap on concurrent remote calls within one fan-out.
    pub max_concurrent: usize,

    /// Log failures that lose the race to report first.
    pub log_dropped_failures: bool,

    pub request_timeout_secs: u64,

    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Address book used when a command doesn't name one.
    pub contacts_book: Option<String>,

    /// Viewers with emails at these domains are left out of webinar reports.
    pub excluded_email_domains: Vec<String>,

    /// Offset for local times in report names.
    pub utc_offset_hours: i8,

    /// Mixed into derived viewer keys.
    pub key_secret: String,

    pub mailer: MailerConfig,
    pub stream: StreamConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MailerConfig {
    pub uri: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StreamConfig {
    pub uri: String,
    pub uid: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    pub ttl_hours: u64,
    pub refresh_minutes: u64,
    pub prune_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: 300,
            log_dropped_failures: false,
            request_timeout_secs: 30,
            log_level: "warn".to_string(),
            contacts_book: None,
            excluded_email_domains: Vec::new(),
            utc_offset_hours: 0,
            key_secret: String::new(),
            mailer: MailerConfig::default(),
            stream: StreamConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Where a loaded config came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(PathBuf),
    /// The file at this path doesn't exist.
    Defaults(PathBuf),
}

impl Origin {
    /// Report the origin. Called once logging is set up.
    pub fn log(&self) {
        match self {
            Self::File(path) => tracing::debug!(path = %path.display(), "config loaded"),
            Self::Defaults(path) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
            }
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 168,
            refresh_minutes: 60,
            prune_interval_minutes: 10,
        }
    }
}

impl Config {
    /// Load config from `~/.muster/config.toml` and the environment.
    pub fn load() -> Result<(Self, Origin), String> {
        let path = Self::path().ok_or("could not determine home directory")?;
        let (mut config, origin) = Self::load_from(&path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate().map_err(|e| format!("{e} (in {})", path.display()))?;
        Ok((config, origin))
    }

    /// Read `path`, falling back to defaults when it doesn't exist.
    pub fn load_from(path: &Path) -> Result<(Self, Origin), String> {
        if !path.exists() {
            return Ok((Self::default(), Origin::Defaults(path.to_path_buf())));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        let config = toml::from_str(&contents)
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))?;
        Ok((config, Origin::File(path.to_path_buf())))
    }

    /// The config file path: `~/.muster/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".muster").join("config.toml"))
    }

    /// Replace secrets with non-empty values from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for name in SECRET_OVERRIDES {
            let Some(value) = lookup(name).filter(|v| !v.is_empty()) else {
                continue;
            };
            let field = match name {
                "MUSTER_MAILER_API_KEY" => &mut self.mailer.api_key,
                "MUSTER_STREAM_UID" => &mut self.stream.uid,
                "MUSTER_STREAM_API_KEY" => &mut self.stream.api_key,
                _ => &mut self.key_secret,
            };
            *field = value;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max-concurrent must be at least 1".to_string());
        }
        for (key, uri) in [("mailer.uri", &self.mailer.uri), ("stream.uri", &self.stream.uri)] {
            if !uri.is_empty() && !uri.ends_with('/') {
                return Err(format!("{key} must end with '/', got {uri:?}"));
            }
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<Offset, String> {
        Offset::from_hours(self.utc_offset_hours)
            .map_err(|e| format!("utc-offset-hours is out of range: {e}"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }

    pub fn refresh_after(&self) -> Duration {
        Duration::from_secs(self.refresh_minutes.saturating_mul(60))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_minutes.saturating_mul(60).max(1))
    }
}
