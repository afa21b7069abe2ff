//! Client request heads, as seen by the cache.
//!
//! The cache only ever inspects the method, target and headers of a request;
//! the body is left to the proxy.

use thiserror::Error;

use super::{Headers, Method};
use crate::cache::control::CacheControl;

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request head.
///
/// # Examples
///
/// ```
/// use proxy_cache::http::{Method, Request};
///
/// let raw = b"GET http://origin.test/a?b=1 HTTP/1.1\r\nHost: origin.test\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.target(), "http://origin.test/a?b=1");
/// assert_eq!(request.headers().get("host"), Some("origin.test"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds a request head programmatically.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: 1,
            headers: Headers::new(),
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The same request head under another method.
    pub fn with_method(&self, method: Method) -> Self {
        Self {
            method,
            ..self.clone()
        }
    }

    /// Parses a request head from a byte slice.
    ///
    /// Returns the request and the byte offset at which the body begins in
    /// `buf` (immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the header block is not complete yet.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, target or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(token) => match token.parse() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "target" })?
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                method,
                target,
                version,
                headers: header_map,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as received (origin or absolute form).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The request's own `Cache-Control` directives.
    pub fn cache_control(&self) -> CacheControl {
        crate::cache::freshness::cache_control(&self.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_absolute_form() {
        let raw = b"GET http://example.com/x HTTP/1.1\r\nHost: example.com\r\nCache-Control: no-store\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.target(), "http://example.com/x");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("cache-control"), Some("no-store"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_offset_points_past_headers() {
        let raw = b"POST /submit HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Post);
        assert_eq!(req.version(), 0);
        assert_eq!(&raw[body_offset..], b"hello");
    }

    #[test]
    fn builder() {
        let req = Request::new(Method::Head, "/a").header("Authorization", "Bearer t");
        assert_eq!(req.target(), "/a");
        assert!(req.headers().contains("authorization"));
    }

    #[test]
    fn with_method_keeps_head() {
        let head = Request::new(Method::Head, "/a").header("Accept", "text/html");
        let get = head.with_method(Method::Get);
        assert_eq!(get.method(), &Method::Get);
        assert_eq!(get.target(), "/a");
        assert_eq!(get.headers().get("accept"), Some("text/html"));
    }
}
