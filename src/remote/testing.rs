//! In-memory [`Remote`] for tests.
//!
//! Replies are scripted per operation, optionally narrowed to requests that
//! carry a given parameter value. The most specific matching route wins.

use parking_lot::Mutex;

use super::{Remote, RemoteError, Request, Result};

#[derive(Debug, Clone)]
enum Reply {
    Body(Vec<u8>),
    Status(u16, Vec<u8>),
}

#[derive(Debug, Clone)]
struct Route {
    operation: String,
    param: Option<(String, String)>,
    reply: Reply,
}

#[derive(Debug, Default)]
pub struct ScriptedRemote {
    routes: Vec<Route>,
    sent: Mutex<Vec<Request>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `operation` request with `body`.
    pub fn reply(self, operation: &str, body: impl Into<String>) -> Self {
        self.route(operation, None, Reply::Body(body.into().into_bytes()))
    }

    /// Answer `operation` requests whose `param` equals `value` with `body`.
    pub fn reply_when(
        self,
        operation: &str,
        param: &str,
        value: &str,
        body: impl Into<String>,
    ) -> Self {
        self.route(
            operation,
            Some((param.to_string(), value.to_string())),
            Reply::Body(body.into().into_bytes()),
        )
    }

    /// Answer every `operation` request with an HTTP error.
    pub fn status(self, operation: &str, status: u16, body: impl Into<String>) -> Self {
        self.route(operation, None, Reply::Status(status, body.into().into_bytes()))
    }

    /// Requests sent so far for `operation`.
    pub fn sent(&self, operation: &str) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }

    fn route(mut self, operation: &str, param: Option<(String, String)>, reply: Reply) -> Self {
        self.routes.push(Route {
            operation: operation.to_string(),
            param,
            reply,
        });
        self
    }

    fn find(&self, request: &Request) -> Option<&Route> {
        let candidates = self.routes.iter().filter(|r| r.operation == request.operation);
        let mut fallback = None;
        for route in candidates {
            match &route.param {
                Some((name, value)) => {
                    if request.param(name).as_deref() == Some(value.as_str()) {
                        return Some(route);
                    }
                }
                None => fallback = fallback.or(Some(route)),
            }
        }
        fallback
    }
}

impl Remote for ScriptedRemote {
    async fn send(&self, request: &Request) -> Result<Vec<u8>> {
        self.sent.lock().push(request.clone());

        let route = self.find(request).cloned().ok_or_else(|| RemoteError::Status {
            status: 404,
            body: format!("no scripted reply for {}", request.operation).into_bytes(),
        })?;

        match route.reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status, body) => Err(RemoteError::Status { status, body }),
        }
    }
}
