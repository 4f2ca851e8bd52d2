//! Mailing-list service client.
//!
//! Every call is a JSON `POST` to a single endpoint, naming the method in
//! the body. Responses share one envelope:
//!
//! ```text
//! { "response": { "msg": { "err_code": 0, "text": "OK", "type": "message" },
//!                 "data": ... } }
//! ```
//!
//! A non-zero `err_code` is a documented service error. Address books
//! store profile fields in numbered `merge_N` columns whose human titles
//! come from the book itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use jiff::civil::Date;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Method, Payload, Remote, RemoteError, Request, Result, exchange};
use crate::model::{CampaignStats, CampaignSummary, Contact, SubscriptionStatus};
use crate::trace::StageTrace;

/// Upper bound on members returned by one listing.
const MEMBER_LIMIT: u64 = 1_000_000;

/// Column name (`merge_N`) to lower-cased column title.
pub type Titles = HashMap<String, String>;

/// Meanings of the documented error codes, indexed by `code - 1`.
const ERROR_MEANINGS: [&str; 56] = [
    "wrong login or password",
    "failed to add to the database",
    "not all required parameters were given",
    "no data to return",
    "the user has no address book with this id",
    "invalid email address",
    "this contact is already in the address book",
    "active subscriber limit of the plan reached",
    "the client has no such subscriber",
    "the contact has already unsubscribed",
    "no data to update the subscriber with",
    "list items are not set",
    "sending time is not set",
    "message subject is not set",
    "sender name is not set",
    "reply-to address is not set",
    "neither an html nor a plain-text body is set",
    "no unsubscribe link (id='unsub_link') in the message",
    "no unsubscribe placeholder in the message",
    "invalid campaign status",
    "the campaign is already being sent",
    "no campaign with this campaign_id",
    "no such sort field",
    "invalid trigger events for an automated campaign",
    "the uploaded file already exists",
    "the uploaded file is larger than 5 MB",
    "file not found",
    "the template does not exist",
    "disposable email address detected",
    "sending is blocked on suspicion of spam",
    "the email address list is empty",
    "no valid addresses to add",
    "unsupported file format",
    "a custom sending domain must be configured",
    "not available on free plans or during the trial",
    "failed to send the message",
    "the campaign has not passed moderation yet",
    "invalid segment",
    "no folder with this id",
    "the campaign is neither PROCESSING nor SENT",
    "the campaign is not being sent right now",
    "no paused campaign with this campaign_id",
    "contact is blacklisted (double unsubscribe)",
    "contact is blacklisted (marked as spam)",
    "contact is blacklisted (manually)",
    "address does not exist (global bounce list)",
    "your IP address is not allow-listed",
    "could not send the reply-to confirmation message",
    "this address is already confirmed",
    "disposable addresses cannot be used as reply-to",
    "reply-to addresses on this public domain are forbidden by its DMARC policy",
    "the address is not confirmed as a sender",
    "invalid webhook event",
    "invalid domain: national domains cannot be used for DKIM/SPF",
    "the domain is blacklisted",
    "the domain belongs to another account",
];

// ── Envelope ──

#[derive(Debug, Deserialize)]
struct Envelope {
    response: Reply,
}

#[derive(Debug, Deserialize)]
struct Reply {
    msg: Status,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct Status {
    err_code: i64,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ColumnTitle {
    title: String,
}

impl Status {
    fn check(&self) -> Result<()> {
        let meaning = usize::try_from(self.err_code)
            .ok()
            .and_then(|code| code.checked_sub(1))
            .and_then(|index| ERROR_MEANINGS.get(index));

        match (self.err_code, meaning) {
            (0, _) => Ok(()),
            (code, Some(meaning)) => Err(RemoteError::Service {
                code,
                text: self.text.clone(),
                meaning,
            }),
            (code, None) => Err(RemoteError::UnknownServiceCode {
                code,
                text: self.text.clone(),
            }),
        }
    }
}

/// Decode the envelope and return its `data` if the service reported success.
fn open_envelope(body: &[u8], trace: &mut StageTrace) -> Result<Value> {
    trace.set_last_stage("check service status");
    let envelope: Envelope = serde_json::from_slice(body)?;
    envelope.response.msg.check()?;
    Ok(envelope.response.data)
}

/// The single object in `data`, which must be a one-element array.
pub fn expect_single(data: Value) -> Result<Map<String, Value>> {
    let mut items = match data {
        Value::Array(items) => items,
        other => {
            return Err(RemoteError::Shape(format!(
                "expected a data array, got {}",
                kind(&other)
            )));
        }
    };
    if items.len() > 1 {
        return Err(RemoteError::Shape(format!(
            "expected one element in the data array, got {}",
            items.len()
        )));
    }
    match items.pop() {
        None => Err(RemoteError::Shape(
            "service answered without an error but with an empty data array".to_string(),
        )),
        Some(Value::Object(item)) => Ok(item),
        Some(other) => Err(RemoteError::Shape(format!(
            "expected an object in the data array, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A field as text. Numbers are rendered; missing and null are empty.
fn text(item: &Map<String, Value>, field: &str) -> String {
    match item.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// A counter field. The service sends numbers as strings; empty means zero.
fn count(item: &Map<String, Value>, field: &str) -> Result<u64> {
    match item.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| invalid(field, "a count", n)),
        Some(Value::String(s)) if s.is_empty() => Ok(0),
        Some(Value::String(s)) => s.parse().map_err(|_| invalid(field, "a count", s)),
        Some(other) => Err(invalid(field, "a count", kind(other))),
    }
}

fn invalid(field: &str, expected: &'static str, received: impl ToString) -> RemoteError {
    RemoteError::InvalidField {
        field: field.to_string(),
        expected,
        received: received.to_string(),
    }
}

fn unescape(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

// ── Client ──

/// Mailing-list service client.
#[derive(Debug)]
pub struct Mailer<R> {
    remote: Arc<R>,
    uri: String,
    api_key: String,
}

impl<R: Remote> Mailer<R> {
    pub fn new(remote: Arc<R>, uri: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            remote,
            uri: uri.into(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: &str, params: Value) -> Request {
        let mut redacted = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        redacted.insert("method".to_string(), Value::from(method));

        let mut body = redacted.clone();
        body.insert("api_key".to_string(), Value::from(self.api_key.as_str()));

        Request {
            operation: method.to_string(),
            method: Method::Post,
            url: self.uri.clone(),
            payload: Payload::Json(Value::Object(body)),
            redacted: Value::Object(redacted).to_string().into_bytes(),
        }
    }

    async fn call(&self, method: &str, params: Value, trace: &mut StageTrace) -> Result<Value> {
        let request = self.request(method, params);
        let body = exchange(&*self.remote, &request, trace).await?;
        open_envelope(&body, trace)
    }

    /// Campaigns sent between `start` and `end`, both inclusive.
    pub async fn campaigns(
        &self,
        start: Date,
        end: Date,
        trace: &mut StageTrace,
    ) -> Result<Vec<CampaignSummary>> {
        trace.enter_stage("campaign list");
        let result = self.campaigns_inner(start, end, trace).await;
        trace.pop_stage_on_success(&result);
        result
    }

    async fn campaigns_inner(
        &self,
        start: Date,
        end: Date,
        trace: &mut StageTrace,
    ) -> Result<Vec<CampaignSummary>> {
        // The service treats `end` as exclusive midnight.
        let end = end
            .tomorrow()
            .map_err(|e| invalid("end", "a date before the end of time", e))?;

        let params = json!({
            "status": "SENT",
            "start": start.to_string(),
            "end": end.to_string(),
            "merge_json": 1,
        });
        let data = self.call("campaigns.get", params, trace).await?;

        trace.set_last_stage("decode campaigns");
        let Value::Array(items) = data else {
            return Err(RemoteError::Shape(format!(
                "expected a campaign array, got {}",
                kind(&data)
            )));
        };
        items
            .iter()
            .map(|item| match item {
                Value::Object(item) => campaign_summary(item),
                other => Err(invalid("data[]", "an object", kind(other))),
            })
            .collect()
    }

    /// Delivery statistics for one campaign.
    pub async fn campaign_detail(&self, id: u64, trace: &mut StageTrace) -> Result<CampaignStats> {
        trace.enter_stage("campaign detail");
        let result: Result<CampaignStats> = async {
            let data = self
                .call("reports.summary", json!({ "campaign_id": id }), trace)
                .await?;

            trace.set_last_stage("decode campaign detail");
            let item = match data {
                Value::Object(item) => item,
                other => expect_single(other)?,
            };
            campaign_stats(&item)
        }
        .await;
        trace.pop_stage_on_success(&result);
        result
    }

    /// Ids of every address book on the account.
    pub async fn books(&self, trace: &mut StageTrace) -> Result<Vec<String>> {
        trace.enter_stage("book list");
        let result: Result<Vec<String>> = async {
            let data = self.call("lists.get", json!({ "merge_json": 1 }), trace).await?;

            trace.set_last_stage("decode books");
            let Value::Array(items) = data else {
                return Err(RemoteError::Shape(format!(
                    "expected a book array, got {}",
                    kind(&data)
                )));
            };
            items
                .iter()
                .map(|item| {
                    let Value::Object(item) = item else {
                        return Err(invalid("data[]", "an object", kind(item)));
                    };
                    let id = text(item, "id");
                    if id.is_empty() {
                        return Err(invalid("id", "a book id", "nothing"));
                    }
                    Ok(id)
                })
                .collect()
        }
        .await;
        trace.pop_stage_on_success(&result);
        result
    }

    /// Column titles of an address book.
    pub async fn book_titles(&self, book: &str, trace: &mut StageTrace) -> Result<Titles> {
        trace.enter_stage("book titles");
        let result: Result<Titles> = async {
            if book.is_empty() {
                return Err(invalid("list_id", "a book id", "an empty string"));
            }
            let data = self
                .call("lists.get", json!({ "list_id": book, "merge_json": 1 }), trace)
                .await?;

            trace.set_last_stage("decode titles");
            let columns = expect_single(data)?;
            columns
                .iter()
                .filter(|(name, _)| name.starts_with("merge_"))
                .map(|(name, value)| {
                    let title: ColumnTitle = match value {
                        Value::String(raw) => serde_json::from_str(raw)?,
                        Value::Object(_) => serde_json::from_value(value.clone())?,
                        other => return Err(invalid(name, "a column title", kind(other))),
                    };
                    Ok((name.to_lowercase(), title.title.to_lowercase()))
                })
                .collect()
        }
        .await;
        trace.pop_stage_on_success(&result);
        result
    }

    /// One contact from `book`.
    ///
    /// A lookup the service refuses (unknown address, blacklisted, ...) is
    /// not a failure: the contact comes back carrying the reason.
    pub async fn member(
        &self,
        book: &str,
        titles: &Titles,
        email: &str,
        trace: &mut StageTrace,
    ) -> Result<Contact> {
        trace.enter_stage("contact lookup");
        let result: Result<Contact> = async {
            let params = json!({ "list_id": book, "email": email });
            let data = match self.call("lists.get_members", params, trace).await {
                Ok(data) => data,
                Err(
                    e @ (RemoteError::Service { .. } | RemoteError::UnknownServiceCode { .. }),
                ) => {
                    tracing::debug!(email, error = %e, "contact lookup refused");
                    return Ok(Contact::unreadable(e));
                }
                Err(e) => return Err(e),
            };

            trace.set_last_stage("decode contact");
            let row = expect_single(data)?;
            Ok(contact_from_row(&row, titles))
        }
        .await;
        trace.pop_stage_on_success(&result);
        result
    }

    /// Write `fields` (column title to value) onto `email` in `book`.
    ///
    /// The contact is created when missing and overwritten otherwise.
    /// Titles match case-insensitively. Empty values and titles the book has
    /// no column for are left out.
    pub async fn add_member(
        &self,
        book: &str,
        titles: &Titles,
        email: &str,
        fields: &BTreeMap<String, String>,
        trace: &mut StageTrace,
    ) -> Result<()> {
        trace.enter_stage("contact update");
        let mut params = Map::new();
        params.insert("list_id".to_string(), Value::from(book));
        params.insert("email".to_string(), Value::from(email));
        params.insert("update".to_string(), Value::from("update"));
        params.insert("no_check".to_string(), Value::from("no_check"));
        let fields: BTreeMap<String, &String> = fields
            .iter()
            .map(|(title, value)| (title.to_lowercase(), value))
            .collect();
        for (column, title) in titles {
            if let Some(value) = fields.get(title).filter(|v| !v.is_empty()) {
                params.insert(column.clone(), Value::from(value.as_str()));
            }
        }

        let result = self
            .call("lists.add_member", Value::Object(params), trace)
            .await
            .map(drop);
        trace.pop_stage_on_success(&result);
        result
    }

    /// Every contact in `book`, keyed by email.
    pub async fn members(
        &self,
        book: &str,
        trace: &mut StageTrace,
    ) -> Result<BTreeMap<String, Contact>> {
        trace.enter_stage("book members");
        let result: Result<BTreeMap<String, Contact>> = async {
            let params = json!({ "list_id": book, "limit": MEMBER_LIMIT });
            let data = self.call("lists.get_members", params, trace).await?;
            let titles = self.book_titles(book, trace).await?;

            trace.set_last_stage("decode members");
            let Value::Array(rows) = data else {
                return Err(RemoteError::Shape(format!(
                    "expected a member array, got {}",
                    kind(&data)
                )));
            };
            let mut contacts = BTreeMap::new();
            for row in &rows {
                let Value::Object(row) = row else {
                    return Err(invalid("data[]", "an object", kind(row)));
                };
                let email = text(row, "email");
                if email.is_empty() {
                    return Err(invalid("email", "an address", "nothing"));
                }
                contacts.insert(email, contact_from_row(row, &titles));
            }
            Ok(contacts)
        }
        .await;
        trace.pop_stage_on_success(&result);
        result
    }
}

// ── Decoding ──

fn campaign_summary(item: &Map<String, Value>) -> Result<CampaignSummary> {
    let id = text(item, "id");
    let id = id.parse().map_err(|_| invalid("id", "a campaign id", &id))?;

    Ok(CampaignSummary {
        id,
        name: unescape(&text(item, "name")),
        delivery_time: text(item, "delivery_time"),
        tag_utm: text(item, "analytics_tag"),
        source_utm: text(item, "analytics_source"),
        medium_utm: text(item, "analytics_medium"),
        content_utm: text(item, "analytics_content"),
        term_utm: text(item, "analytics_term"),
    })
}

fn campaign_stats(item: &Map<String, Value>) -> Result<CampaignStats> {
    Ok(CampaignStats {
        sent: count(item, "sent")?,
        clicked: count(item, "clicked")?,
        opened: count(item, "opened")?,
        unique_opened: count(item, "unique_opened")?,
        unique_clicked: count(item, "unique_clicked")?,
        unsubscribed: count(item, "unsubscribed")?,
        spam_complained: count(item, "complained")?,
        spam_blocked: count(item, "spam_blocked")?,
        spam_marked: count(item, "spam")?,
        mail_system_blocked: count(item, "blk")?,
        hard_bounced: count(item, "hard")?,
        soft_bounced: count(item, "soft")?,
        first_sent: text(item, "first_sent"),
        first_open: text(item, "first_open"),
        last_open: text(item, "last_open"),
        first_click: text(item, "first_click"),
        last_click: text(item, "last_click"),
    })
}

fn contact_from_row(row: &Map<String, Value>, titles: &Titles) -> Contact {
    let mut contact = Contact::default();
    for (column, value) in row {
        let Value::String(value) = value else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        if column == "state" {
            contact.status = Some(SubscriptionStatus::parse(value));
        } else if column.starts_with("merge_")
            && let Some(title) = titles.get(&column.to_lowercase())
        {
            contact.set_titled(title, unescape(value));
        }
    }
    contact
}
