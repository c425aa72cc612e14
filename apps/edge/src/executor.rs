//! Outbound HTTP execution for request envelopes
//!
//! Every failure, from an unparseable URL to a body cut short, is reported back to the
//! gateway as a failed envelope carrying the error text.

use async_proxy_common::{RequestEnvelope, ResponseEnvelope, headers_to_map, strip_hop_by_hop};
use reqwest::{Client, Method, redirect};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

/// Runs envelopes against the origin with one shared client
pub struct Executor {
    client: Client,
    max_timeout: Duration,
}

impl Executor {
    /// Client without redirects or transparent decompression: the client behind the
    /// gateway sees the origin's response as sent
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> Result<Self, ExecuteError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            max_timeout: request_timeout,
        })
    }

    /// Per-request timeout: the gateway's wait, capped by the client's own bound
    fn effective_timeout(&self, requested_secs: f64) -> Duration {
        if requested_secs > 0.0 {
            Duration::try_from_secs_f64(requested_secs)
                .map_or(self.max_timeout, |requested| requested.min(self.max_timeout))
        } else {
            self.max_timeout
        }
    }

    /// Execute one envelope; never fails, errors become failed envelopes
    pub async fn execute(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let request_id = request.request_id.clone();
        let edge_id = request.edge_id.clone();

        match self.try_execute(request).await {
            Ok(mut response) => {
                response.edge_id = edge_id;
                response
            }
            Err(e) => {
                warn!("Request {} failed: {}", request_id, e);
                ResponseEnvelope::failure(request_id, edge_id, e.to_string())
            }
        }
    }

    async fn try_execute(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, ExecuteError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ExecuteError::InvalidMethod(request.method.clone()))?;

        let url = Url::parse(&request.full_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExecuteError::UnsupportedScheme(url.scheme().to_string()));
        }

        debug!("Executing {} {}", method, url);

        let timeout = self.effective_timeout(request.timeout);
        let mut builder = self.client.request(method, url).timeout(timeout);

        let has_body = request.has_body();
        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        // Derived from the URL and the body by the client
        headers.retain(|name, _| {
            !name.eq_ignore_ascii_case("content-length") && !name.eq_ignore_ascii_case("host")
        });
        for (name, values) in &headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        if has_body {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status_code = i32::from(response.status().as_u16());
        let headers = headers_to_map(response.headers());
        let body = response.bytes().await?;

        let mut envelope = ResponseEnvelope::ok(request.request_id, status_code);
        envelope.headers = headers;
        envelope.body = body.to_vec();
        Ok(envelope)
    }
}
