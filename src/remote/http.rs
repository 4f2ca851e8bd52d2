//! reqwest-backed transport.

use std::time::Duration;

use reqwest::Client;

use super::{Method, Payload, Remote, RemoteError, Request, Result};

/// Sends requests over HTTPS with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
}

impl HttpRemote {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Remote for HttpRemote {
    async fn send(&self, request: &Request) -> Result<Vec<u8>> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        let builder = match (&request.payload, request.method) {
            (Payload::Empty, _) => builder,
            (Payload::Json(value), _) => builder.json(value),
            (Payload::Form(pairs), Method::Get) => builder.query(pairs),
            (Payload::Form(pairs), Method::Post) => builder.form(pairs),
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        if status.is_success() {
            Ok(body)
        } else {
            Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
