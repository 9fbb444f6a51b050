//! HTTP client used to issue acceptance test requests against the SUT.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::config::{Method, TestSpec};

/// Fixed port the SUT is expected to serve HTTP on.
pub const SUT_HTTP_PORT: u16 = 80;

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Why a request could not produce a response.
#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error("unsupported method `{0}`")]
    UnsupportedMethod(String),
    #[error("request failed: {0}")]
    Transport(String),
}

/// Base URL of the SUT, e.g. `http://172.17.0.3:80`.
pub fn base_url(ip: &str, port: u16) -> String {
    format!("http://{ip}:{port}")
}

#[derive(Debug, Clone)]
pub struct ProbeClient {
    client: reqwest::Client,
}

impl ProbeClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }

    /// Send the request described by `test` to `base_url` + `test.url`.
    ///
    /// GET and DELETE carry no body; POST and PUT carry the configured body.
    pub async fn send(&self, test: &TestSpec, base_url: &str) -> Result<HttpResponse, RequestError> {
        let url = format!("{base_url}{}", test.url);
        let request = match &test.method {
            Method::Get => self.client.get(&url),
            Method::Delete => self.client.delete(&url),
            Method::Post => self.client.post(&url).body(test.body.clone().unwrap_or_default()),
            Method::Put => self.client.put(&url).body(test.body.clone().unwrap_or_default()),
            Method::Other(raw) => return Err(RequestError::UnsupportedMethod(raw.clone())),
        };

        debug!(test = %test.name, method = %test.method, url = %url, "sending request");
        let response = request
            .send()
            .await
            .map_err(|err| RequestError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| RequestError::Transport(err.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}
