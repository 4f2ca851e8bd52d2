//! Remote service access.
//!
//! Everything that talks to the outside world goes through [`Remote`]: one
//! request in, the raw response body out. The service clients in
//! [`mailer`] and [`stream`] build requests and decode responses on top of
//! it; [`HttpRemote`] is the production transport.
//!
//! [`exchange`] wraps a single round trip with stage bookkeeping so every
//! failure carries the request and response that caused it.

pub mod http;
pub mod mailer;
pub mod stream;
#[cfg(test)]
pub mod testing;

use std::future::Future;

use serde_json::Value;

use crate::trace::StageTrace;

pub use http::HttpRemote;

/// Errors from talking to a remote service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16, body: Vec<u8> },

    /// The mailing service answered with a documented error code.
    #[error("service error {code}: {text} (meaning: {meaning})")]
    Service {
        code: i64,
        text: String,
        meaning: &'static str,
    },

    #[error("unknown service error code {code}: {text}")]
    UnknownServiceCode { code: i64, text: String },

    /// The streaming platform answered with an error body.
    #[error("service refused the request: {0}")]
    Refused(String),

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("field '{field}' should be {expected}, got {received}")]
    InvalidField {
        field: String,
        expected: &'static str,
        received: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, RemoteError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// A request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One logical request to a remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Short name of the remote operation, e.g. `lists.get_members`.
    pub operation: String,
    pub method: Method,
    pub url: String,
    pub payload: Payload,

    /// What the request looks like with credentials left out. Recorded on
    /// the trace in place of the real body.
    pub redacted: Vec<u8>,
}

impl Request {
    /// Look up a parameter by name in the JSON object or form body.
    pub fn param(&self, name: &str) -> Option<String> {
        match &self.payload {
            Payload::Empty => None,
            Payload::Json(value) => value.get(name).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            Payload::Form(pairs) => pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone()),
        }
    }
}

/// A transport that delivers one request and returns the response body.
///
/// Non-2xx answers are reported as [`RemoteError::Status`].
pub trait Remote: Send + Sync {
    fn send(&self, request: &Request) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Send `request`, recording it and its response on `trace`.
pub async fn exchange<R: Remote>(
    remote: &R,
    request: &Request,
    trace: &mut StageTrace,
) -> Result<Vec<u8>> {
    trace.enter_stage(request.method.as_str());
    tracing::trace!(operation = %request.operation, url = %request.url, "sending request");

    let result = remote.send(request).await;
    let received = match &result {
        Ok(body) | Err(RemoteError::Status { body, .. }) => Some(body.as_slice()),
        Err(_) => None,
    };
    trace.record_io(&request.redacted, received);
    trace.pop_stage_on_success(&result);
    result
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRemote;
    use super::*;

    fn request() -> Request {
        Request {
            operation: "lists.get".to_string(),
            method: Method::Post,
            url: "https://mail.example/".to_string(),
            payload: Payload::Json(serde_json::json!({ "list_id": "7", "limit": 10 })),
            redacted: br#"{"list_id":"7"}"#.to_vec(),
        }
    }

    #[test]
    fn params_from_json_and_form() {
        let json = request();
        assert_eq!(json.param("list_id").as_deref(), Some("7"));
        assert_eq!(json.param("limit").as_deref(), Some("10"));
        assert_eq!(json.param("missing"), None);

        let form = Request {
            payload: Payload::Form(vec![("event_code".into(), "abc".into())]),
            ..request()
        };
        assert_eq!(form.param("event_code").as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn exchange_records_io_and_unwinds() {
        let remote = ScriptedRemote::new().reply("lists.get", r#"{"ok":true}"#);
        let mut trace = StageTrace::new("start");

        let body = exchange(&remote, &request(), &mut trace).await.unwrap();

        assert_eq!(body, br#"{"ok":true}"#);
        assert_eq!(trace.path(), "start -> POST");
        let message = trace.render_message();
        assert!(message.contains(r#"sd: {"list_id":"7"}"#));
        assert!(message.contains(r#"rd: {"ok":true}"#));
    }

    #[tokio::test]
    async fn exchange_keeps_breadcrumb_on_status_error() {
        let remote = ScriptedRemote::new().status("lists.get", 502, "bad gateway");
        let mut trace = StageTrace::new("start");

        let err = exchange(&remote, &request(), &mut trace).await.unwrap_err();

        assert!(matches!(err, RemoteError::Status { status: 502, .. }));
        assert!(trace.render_message().contains("rd: bad gateway"));
        assert_eq!(trace.path(), "start -> POST -> ");
    }
}
