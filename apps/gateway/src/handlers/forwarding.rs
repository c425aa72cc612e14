//! Protocol conversion layer
//!
//! Converts one HTTP request, received over HTTP/1.1 or HTTP/2 on either front door, into
//! a dispatch through the edge registry, and the edge's response envelope back into an
//! HTTP response. Every failure is rendered once, at the boundary, by
//! [`crate::error_handling::error_to_response`].

use async_proxy_common::{
    ResponseEnvelope, Result, TunnelError, constants::MAX_BODY_SIZE_BYTES, headers_to_map,
    map_to_headers, protocol::HeaderMultimap, strip_hop_by_hop,
};
use bytes::Bytes;
use http::{Request, Response, StatusCode, Version, header::HOST, uri::Authority};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tracing::debug;

use crate::{SharedState, error_handling::error_to_response, registry::EdgeRegistry};

/// What the ingress knows about the connection a request arrived on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    /// The client connection is TLS-terminated
    pub tls: bool,

    /// Negotiated TLS server name, preferred over the request's own host
    pub server_name: Option<String>,

    /// Host used when the request names none (CONNECT target, SOCKS5 destination)
    pub fallback_host: Option<String>,

    /// Destination port known to the ingress, appended when the host carries no port
    pub port_override: Option<u16>,
}

impl Origin {
    /// A plain HTTP/1.1 proxy request
    pub fn plain() -> Self {
        Self::default()
    }
}

/// Rebuild the absolute target URL of a request
///
/// HTTP/1.x absolute-form targets are used verbatim. Otherwise the URL is assembled
/// from the connection's scheme, a host, the optional port override, and the path and
/// query. The host is the origin's server name if set, else the request's own host
/// (`:authority` or `Host`), else the origin's fallback host.
pub fn reconstruct_url<B>(req: &Request<B>, origin: &Origin) -> Result<String> {
    let uri = req.uri();
    let http1 = matches!(
        req.version(),
        Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11
    );

    if http1 && uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.to_string());
    }

    let scheme = if origin.tls { "https" } else { "http" };

    let request_host = if http1 {
        None
    } else {
        uri.authority().map(|a| a.as_str().to_string())
    }
    .or_else(|| {
        req.headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    })
    .filter(|host| !host.is_empty());

    let mut authority = origin
        .server_name
        .clone()
        .or(request_host)
        .or_else(|| origin.fallback_host.clone())
        .ok_or_else(|| TunnelError::business(400, "No host specified"))?;

    if let Some(port) = origin.port_override {
        let default_port = if origin.tls { 443 } else { 80 };
        if !has_port(&authority) && port != default_port {
            authority = format!("{}:{}", authority, port);
        }
    }

    let mut url = format!("{}://{}", scheme, authority);
    let path = uri.path();
    if !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }

    Ok(url)
}

fn has_port(host: &str) -> bool {
    host.parse::<Authority>()
        .ok()
        .and_then(|authority| authority.port_u16())
        .is_some()
}

async fn read_body<B>(body: B) -> Result<Vec<u8>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_SIZE_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes().to_vec()),
        Err(e) if e.is::<LengthLimitError>() => {
            Err(TunnelError::business(413, "Request body too large"))
        }
        Err(e) => Err(TunnelError::business(
            400,
            format!("Failed to read request body: {}", e),
        )),
    }
}

fn forwardable(mut headers: HeaderMultimap) -> HeaderMultimap {
    strip_hop_by_hop(&mut headers);
    headers.retain(|name, _| !name.eq_ignore_ascii_case("content-length"));
    headers
}

/// Turn the edge's envelope into the client response
fn build_response(envelope: ResponseEnvelope) -> Result<Response<Full<Bytes>>> {
    if !envelope.success {
        return Err(TunnelError::business(
            503,
            format!("Edge returned error: {}", envelope.error_message),
        ));
    }

    let status = u16::try_from(envelope.status_code)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| {
            TunnelError::business(
                502,
                format!("Edge returned invalid status code {}", envelope.status_code),
            )
        })?;

    let headers = forwardable(envelope.headers);
    let mut response = Response::new(Full::new(Bytes::from(envelope.body)));
    *response.status_mut() = status;
    *response.headers_mut() = map_to_headers(&headers);
    Ok(response)
}

/// Convert one request into a dispatch and its result into a response
pub async fn convert_request<B>(
    registry: &EdgeRegistry,
    req: Request<B>,
    origin: &Origin,
    timeout: Duration,
) -> Result<Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let url = reconstruct_url(&req, origin)?;
    let (parts, body) = req.into_parts();
    let body = read_body(body).await?;
    let headers = forwardable(headers_to_map(&parts.headers));

    debug!("Converting {} {} ({} body bytes)", parts.method, url, body.len());

    let envelope = registry
        .dispatch_and_wait(parts.method.as_str(), &url, headers, body, timeout)
        .await?;

    build_response(envelope)
}

/// hyper service entry point: conversion errors become proxy error responses
pub async fn handle_forwarding<B>(
    state: Arc<SharedState>,
    req: Request<B>,
    origin: Origin,
) -> std::result::Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let timeout = state.config.dispatch_timeout;
    match convert_request(&state.registry, req, &origin, timeout).await {
        Ok(response) => Ok(response),
        Err(e) => Ok(error_to_response(&e)),
    }
}
