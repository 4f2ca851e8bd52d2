//! Personal viewer keys for a webinar.

use std::io;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::{Result, Services};
use crate::registry::WebinarRegistry;
use crate::remote::Remote;
use crate::trace::StageTrace;

/// Hex characters kept from the digest.
const KEY_LENGTH: usize = 16;

/// The key `email` should use to watch `event`.
///
/// Reuses a key the platform already knows about. Otherwise derives one,
/// registers it on the platform and remembers it.
pub async fn viewer_key<R: Remote + 'static>(
    services: &Services<R>,
    registry: &WebinarRegistry,
    event: &str,
    email: &str,
    name: &str,
    trace: &mut StageTrace,
) -> Result<String> {
    // No lock is held across the fetch; a concurrent refresh just repeats it.
    if registry.needs_refresh(event, Timestamp::now()) {
        let roster = services.stream.roster(event, trace).await?;
        registry.replace_roster(event, &roster, Timestamp::now());
        tracing::debug!(event, keys = roster.entries.len(), "roster refreshed");
    }

    if let Some(key) = registry.key_for(event, email, Timestamp::now()) {
        return Ok(key);
    }

    let key = derive_key(&services.settings.key_secret, email);
    services
        .stream
        .insert_key(event, name, email, &key, trace)
        .await?;
    registry.record(event, email, key.clone(), Timestamp::now());
    tracing::info!(event, email, "viewer key issued");
    Ok(key)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    event: String,
    email: String,
    #[serde(default)]
    name: String,
}

/// The answer to one login: a key, or why there is none.
#[derive(Debug, Serialize)]
pub struct LoginReply {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub event: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoginReply {
    pub fn issued(event: String, email: String, key: String) -> Self {
        Self { event, email, key: Some(key), error: None }
    }

    fn failed(event: String, email: String, error: String) -> Self {
        Self { event, email, key: None, error: Some(error) }
    }
}

/// Answer login requests, one JSON object per line, until `input` ends.
///
/// Every request shares `registry`, so rosters are fetched once per refresh
/// period instead of once per login. A failed login is answered with its
/// error and serving goes on. Returns how many keys were handed out.
pub async fn serve<R, I, O>(
    services: &Services<R>,
    registry: &WebinarRegistry,
    input: I,
    mut output: O,
) -> io::Result<usize>
where
    R: Remote + 'static,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut issued = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<LoginRequest>(line) {
            Ok(request) => {
                let mut trace = super::begin("login");
                let result = viewer_key(
                    services,
                    registry,
                    &request.event,
                    &request.email,
                    &request.name,
                    &mut trace,
                )
                .await;
                match super::conclude(result, trace, "login") {
                    Ok(key) => {
                        issued += 1;
                        LoginReply::issued(request.event, request.email, key)
                    }
                    Err(message) => LoginReply::failed(request.event, request.email, message),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "unreadable login request");
                LoginReply::failed(String::new(), String::new(), format!("unreadable request: {e}"))
            }
        };

        let mut encoded = serde_json::to_string(&reply).map_err(io::Error::other)?;
        encoded.push('\n');
        output.write_all(encoded.as_bytes()).await?;
        output.flush().await?;
    }

    tracing::info!(issued, events = registry.len(), "login input closed");
    Ok(issued)
}

/// First [`KEY_LENGTH`] hex digits of SHA-256 over `secret` then the
/// lower-cased `email`.
pub fn derive_key(secret: &str, email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(email.to_lowercase().as_bytes());
    let mut key = hex::encode(hasher.finalize());
    key.truncate(KEY_LENGTH);
    key
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::remote::testing::ScriptedRemote;
    use crate::report::fixtures::services;

    const HOUR: Duration = Duration::from_secs(3600);

    fn registry() -> WebinarRegistry {
        WebinarRegistry::new(HOUR * 168, HOUR)
    }

    fn platform() -> ScriptedRemote {
        ScriptedRemote::new()
            .reply(
                "v1/get_event_tickets",
                r#"[{"id": 1, "fio": "Ada", "email": "ada@example.org"}]"#,
            )
            .reply("v1/get_event_keys", r#"[{"ticket_id": 1, "password": "k1"}]"#)
            .reply("v1/insert_key", r#"{"success": true}"#)
    }

    #[test]
    fn derived_keys_are_stable_and_short() {
        let key = derive_key("pepper", "Ada@Example.org");
        assert_eq!(key.len(), KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, derive_key("pepper", "ada@example.org"));
        assert_ne!(key, derive_key("salt", "ada@example.org"));
    }

    #[tokio::test]
    async fn known_viewer_gets_existing_key() {
        let (services, remote) = services(platform());
        let registry = registry();
        let mut trace = StageTrace::new("start of login");

        let key = viewer_key(&services, &registry, "ev1", "ADA@example.org", "Ada", &mut trace)
            .await
            .unwrap();

        assert_eq!(key, "k1");
        assert!(remote.sent("v1/insert_key").is_empty());
    }

    #[tokio::test]
    async fn new_viewer_gets_a_registered_key() {
        let (services, remote) = services(platform());
        let registry = registry();
        let mut trace = StageTrace::new("start of login");

        let key = viewer_key(&services, &registry, "ev1", "bea@example.org", "Bea", &mut trace)
            .await
            .unwrap();

        assert_eq!(key, derive_key("", "bea@example.org"));
        let inserted = remote.sent("v1/insert_key");
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].param("name").as_deref(), Some("Bea"));

        // A second login is answered locally.
        let again = viewer_key(&services, &registry, "ev1", "bea@example.org", "Bea", &mut trace)
            .await
            .unwrap();
        assert_eq!(again, key);
        assert_eq!(remote.sent("v1/insert_key").len(), 1);
        assert_eq!(remote.sent("v1/get_event_tickets").len(), 1);
    }

    #[tokio::test]
    async fn served_logins_share_one_roster() {
        let (services, remote) = services(platform());
        let registry = registry();
        let input = concat!(
            r#"{"event": "ev1", "email": "ada@example.org", "name": "Ada"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"event": "ev1", "email": "bea@example.org", "name": "Bea"}"#,
            "\n",
        );
        let mut output = Vec::new();

        let issued = serve(&services, &registry, input.as_bytes(), &mut output)
            .await
            .unwrap();

        assert_eq!(issued, 2);
        let replies: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["key"], "k1");
        assert!(
            replies[1]["error"]
                .as_str()
                .unwrap()
                .starts_with("unreadable request")
        );
        assert_eq!(replies[2]["key"], derive_key("", "bea@example.org").as_str());
        assert_eq!(remote.sent("v1/get_event_tickets").len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn failed_login_is_answered_and_serving_goes_on() {
        let (services, _) = services(
            ScriptedRemote::new().status("v1/get_event_tickets", 500, "down"),
        );
        let registry = registry();
        let input = concat!(
            r#"{"event": "ev1", "email": "ada@example.org"}"#,
            "\n",
            r#"{"event": "ev2", "email": "ada@example.org"}"#,
            "\n",
        );
        let mut output = Vec::new();

        let issued = serve(&services, &registry, input.as_bytes(), &mut output)
            .await
            .unwrap();

        assert_eq!(issued, 0);
        let text = String::from_utf8(output).unwrap();
        let replies: Vec<serde_json::Value> =
            text.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r["key"].is_null() && r["error"].is_string()));
        assert_eq!(replies[1]["event"], "ev2");
    }
}
