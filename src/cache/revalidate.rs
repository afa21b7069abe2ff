//! Conditional revalidation of stale entries against the origin.
//!
//! A stale entry is re-checked with a `GET` carrying its validators
//! (`If-None-Match`, `If-Modified-Since`). The origin's answer maps onto
//! [`RevalidationOutcome`]; transport failures and elapsed deadlines are
//! reported as [`RevalidationOutcome::Unreachable`] so the caller can fall back
//! to a direct fetch instead of serving unverified data.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use crate::config::RevalidationSettings;
use crate::http::{Headers, Response, StatusCode};

/// Errors raised while talking to the origin.
#[derive(Debug, Error)]
pub enum RevalidationError {
    #[error("origin request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("origin unreachable: {0}")]
    Io(#[from] std::io::Error),

    #[error("origin did not answer before the deadline")]
    DeadlineElapsed,

    #[error("origin answered with invalid status {0}")]
    InvalidStatus(u16),
}

/// An outbound `GET` to the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRequest {
    pub uri: String,
    pub headers: Headers,
}

impl OriginRequest {
    /// An unconditional fetch of `uri`.
    pub fn fetch(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: Headers::new(),
        }
    }

    /// A conditional request built from the entry's stored validators.
    ///
    /// With neither an `ETag` nor a `Last-Modified` the request is
    /// unconditional and the origin answers with a full response.
    pub fn conditional(entry: &CacheEntry) -> Self {
        let mut request = Self::fetch(entry.uri());
        if let Some(last_modified) = entry.last_modified() {
            request.headers.insert("If-Modified-Since", last_modified);
        }
        if let Some(etag) = entry.etag() {
            request.headers.insert("If-None-Match", etag);
        }
        request
    }
}

/// The egress path used to reach origins.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OriginRequest) -> Result<Response, RevalidationError>;
}

/// [`Transport`] over `reqwest`.
///
/// Uses the configured upstream proxy when one is set and otherwise the
/// proxy environment (`HTTP_PROXY`, `HTTPS_PROXY`, `NO_PROXY`), so
/// revalidation leaves through the same egress path as regular fetches.
/// Redirects are returned to the caller, not followed.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(settings: &RevalidationSettings) -> Result<Self, RevalidationError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.timeout);
        if let Some(proxy) = settings.upstream_proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OriginRequest) -> Result<Response, RevalidationError> {
        let mut builder = self.client.get(&request.uri);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let code = response.status().as_u16();
        let status = StatusCode::from_u16(code).ok_or(RevalidationError::InvalidStatus(code))?;

        let headers = capture_headers(response.headers());
        let body = response.bytes().await?;

        Ok(Response::from_parts(status, headers, body))
    }
}

/// Copies origin headers. Values that are not valid UTF-8 (legal in HTTP as
/// opaque bytes) are kept, with the invalid bytes replaced.
fn capture_headers(map: &reqwest::header::HeaderMap) -> Headers {
    let mut headers = Headers::with_capacity(map.len());
    for (name, value) in map {
        match value.to_str() {
            Ok(text) => headers.insert(name.as_str(), text),
            Err(_) => {
                let lossy = String::from_utf8_lossy(value.as_bytes()).into_owned();
                debug!(header = %name, value = %lossy, "origin header is not valid UTF-8");
                headers.insert(name.as_str(), lossy);
            }
        }
    }
    headers
}

/// What the origin said about a stale entry.
#[derive(Debug)]
pub enum RevalidationOutcome {
    /// `304 Not Modified`; carries the 304's headers for refreshing the entry.
    StillFresh(Headers),
    /// Any other answer; the response replaces the stored one.
    Changed(Response),
    /// The origin could not be reached in time. Never serve the stale entry as verified.
    Unreachable(RevalidationError),
}

/// Issues conditional requests for stale entries.
pub struct RevalidationClient<T = HttpTransport> {
    transport: T,
    timeout: Duration,
}

impl RevalidationClient<HttpTransport> {
    /// Builds a client over the `reqwest` transport.
    pub fn from_settings(settings: &RevalidationSettings) -> Result<Self, RevalidationError> {
        Ok(Self::new(HttpTransport::new(settings)?, settings.timeout))
    }
}

impl<T: Transport> RevalidationClient<T> {
    /// `timeout` bounds each revalidation unless the caller supplies its own deadline.
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The bound on a revalidation when the caller supplies no deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Revalidates `entry` within the client's default timeout.
    pub async fn revalidate(&self, entry: &CacheEntry) -> RevalidationOutcome {
        self.revalidate_until(entry, Instant::now() + self.timeout)
            .await
    }

    /// Revalidates `entry`, giving up at `deadline`.
    ///
    /// Dropping the returned future aborts the outbound request.
    pub async fn revalidate_until(
        &self,
        entry: &CacheEntry,
        deadline: Instant,
    ) -> RevalidationOutcome {
        let request = OriginRequest::conditional(entry);
        let conditional = !request.headers.is_empty();

        let answer = tokio::time::timeout_at(deadline, self.transport.send(request)).await;
        let response = match answer {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(uri = %entry.uri(), error = %e, "revalidation failed");
                return RevalidationOutcome::Unreachable(e);
            }
            Err(_) => {
                warn!(uri = %entry.uri(), "revalidation deadline elapsed");
                return RevalidationOutcome::Unreachable(RevalidationError::DeadlineElapsed);
            }
        };

        debug!(
            uri = %entry.uri(),
            conditional,
            status = response.status().as_u16(),
            "origin answered revalidation"
        );

        if response.status() == StatusCode::NOT_MODIFIED {
            let (_, headers, _) = response.into_parts();
            RevalidationOutcome::StillFresh(headers)
        } else {
            RevalidationOutcome::Changed(response)
        }
    }
}
