//! Cached responses and the read-path freshness check.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::date::format_http_date;
use super::freshness::{EntryMetadata, FreshnessEvaluator};
use crate::http::{Headers, Response, StatusCode};

/// Headers of a `304` that describe the connection or the framing of that
/// empty response, never the stored representation.
const NOT_MERGED: [&str; 5] = [
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "content-range",
];

/// Read-path verdict for a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve as-is, no network call.
    Fresh,
    /// Ask the origin before reuse.
    StaleNeedsRevalidation,
}

/// One cached response plus its freshness metadata.
///
/// Entries are never mutated: a revalidated or replaced response becomes a
/// new entry that overwrites the old record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "url")]
    uri: String,
    #[serde(rename = "status_code")]
    status: u16,
    headers: Headers,
    #[serde(with = "body_base64")]
    body: Bytes,
    etag: Option<String>,
    last_modified: Option<String>,
    must_revalidate: bool,
    #[serde(with = "time::serde::timestamp")]
    valid_until: OffsetDateTime,
    max_age: u64,
}

impl CacheEntry {
    /// Captures an origin response under `uri`.
    ///
    /// A response without a `Date` gets one for the time it was evaluated.
    pub fn new(uri: impl Into<String>, response: &Response, meta: EntryMetadata) -> Self {
        let mut entry = Self {
            uri: uri.into(),
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            body: response.body_ref().clone(),
            etag: meta.etag,
            last_modified: meta.last_modified,
            must_revalidate: meta.must_revalidate,
            valid_until: meta.valid_until,
            max_age: meta.max_age,
        };
        if !entry.headers.contains("date") {
            if let Some(date) = format_http_date(entry.generated_at()) {
                entry.headers.insert("Date", date);
            }
        }
        entry
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    pub fn must_revalidate(&self) -> bool {
        self.must_revalidate
    }

    pub fn valid_until(&self) -> OffsetDateTime {
        self.valid_until
    }

    /// Freshness lifetime in seconds, used as the store TTL.
    pub fn max_age(&self) -> u64 {
        self.max_age
    }

    /// Decides whether the entry can be served at `now` without asking the origin.
    ///
    /// Pure: never performs I/O.
    pub fn verify(&self, now: OffsetDateTime) -> Freshness {
        if !self.must_revalidate && now < self.valid_until {
            Freshness::Fresh
        } else {
            Freshness::StaleNeedsRevalidation
        }
    }

    /// Builds the entry that replaces this one after the origin answered `304`.
    ///
    /// Returns `None` when the updated headers forbid storing (`no-store`).
    pub fn refreshed(
        &self,
        evaluator: &FreshnessEvaluator,
        not_modified: &Headers,
        now: OffsetDateTime,
    ) -> Option<Self> {
        let updates: Vec<(&str, &str)> = not_modified
            .iter()
            .filter(|(name, _)| !NOT_MERGED.iter().any(|h| name.eq_ignore_ascii_case(h)))
            .collect();
        let mut headers = self.headers.clone();
        for (name, _) in &updates {
            headers.remove(name);
        }
        for (name, value) in updates {
            headers.insert(name, value);
        }

        let meta = evaluator
            .reevaluate(&headers, not_modified, self.max_age, now)
            .into_metadata()?;

        let mut entry = Self {
            uri: self.uri.clone(),
            status: self.status,
            headers,
            body: self.body.clone(),
            etag: meta.etag,
            last_modified: meta.last_modified,
            must_revalidate: meta.must_revalidate,
            valid_until: meta.valid_until,
            max_age: meta.max_age,
        };
        // Without a Date on the 304 the stored one is stale; restamp it.
        if !not_modified.contains("date") {
            if let Some(date) = format_http_date(entry.generated_at()) {
                entry.headers.set("Date", date);
            }
        }
        Some(entry)
    }

    /// Reconstructs the response to send to a client at `now`.
    ///
    /// An `Age` header reports the seconds elapsed since the response was
    /// generated.
    pub fn to_response(&self, now: OffsetDateTime) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let age = (now - self.generated_at()).whole_seconds().max(0);

        let mut response = Response::from_parts(status, self.headers.clone(), self.body.clone());
        response.headers_mut().set("Age", age.to_string());
        response
    }

    /// The reference time the lifetime was measured from.
    fn generated_at(&self) -> OffsetDateTime {
        self.valid_until
            .checked_sub(time::Duration::seconds(self.max_age as i64))
            .unwrap_or(self.valid_until)
    }

    /// Serializes the entry into its stored record.
    pub fn to_record(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a stored record.
    pub fn from_record(record: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(record)
    }
}

mod body_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
