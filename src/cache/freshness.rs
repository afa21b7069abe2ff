//! Cacheability and freshness lifetime of origin responses.
//!
//! Lifetime sources, highest priority first: `s-maxage`, `max-age`,
//! `Expires`, then the configured default. Exactly one of them determines an
//! entry's `valid_until`. Parse failures never surface as errors; a malformed
//! source is skipped in favour of the next one.

use std::time::Duration;

use time::OffsetDateTime;

use super::control::{CacheControl, MAX_DELTA_SECONDS};
use super::date::parse_http_date;
use crate::http::Headers;

/// Where an entry's freshness lifetime came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeSource {
    SMaxAge,
    MaxAge,
    Expires,
    Default,
}

/// Freshness metadata for a cacheable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// The origin asked for a check before every reuse.
    pub must_revalidate: bool,
    /// The instant after which the entry is stale.
    pub valid_until: OffsetDateTime,
    /// Freshness lifetime in seconds; also the store TTL.
    pub max_age: u64,
    pub source: LifetimeSource,
}

/// Outcome of [`FreshnessEvaluator::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// `no-store`: the response must not be written to the cache.
    NotCacheable,
    Cacheable(EntryMetadata),
}

impl Evaluation {
    pub fn into_metadata(self) -> Option<EntryMetadata> {
        match self {
            Self::NotCacheable => None,
            Self::Cacheable(meta) => Some(meta),
        }
    }
}

/// Computes cacheability and freshness from response headers.
///
/// Holds the process-wide fallback lifetime (`server.cache_timeout`), which
/// is fixed once the evaluator is built.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use proxy_cache::cache::freshness::{Evaluation, FreshnessEvaluator};
/// use proxy_cache::http::Headers;
/// use time::macros::datetime;
///
/// let mut headers = Headers::new();
/// headers.insert("Date", "Wed, 21 Oct 2015 07:28:00 GMT");
/// headers.insert("Cache-Control", "max-age=120");
///
/// let evaluator = FreshnessEvaluator::new(Duration::from_secs(600));
/// let Evaluation::Cacheable(meta) = evaluator.evaluate(&headers, datetime!(2015-10-21 07:28:03 UTC)) else {
///     panic!("cacheable");
/// };
/// assert_eq!(meta.valid_until, datetime!(2015-10-21 07:30:00 UTC));
/// assert_eq!(meta.max_age, 120);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FreshnessEvaluator {
    default_lifetime: u64,
}

impl FreshnessEvaluator {
    pub fn new(default_lifetime: Duration) -> Self {
        Self {
            default_lifetime: default_lifetime.as_secs().min(MAX_DELTA_SECONDS),
        }
    }

    /// The fallback lifetime used when a response carries no explicit one.
    pub fn default_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_lifetime)
    }

    /// Evaluates a response's headers at wall-clock time `now`.
    pub fn evaluate(&self, headers: &Headers, now: OffsetDateTime) -> Evaluation {
        self.evaluate_from(headers, reference_time(headers, now))
    }

    /// Evaluates `headers` with lifetimes counted from `reference`.
    fn evaluate_from(&self, headers: &Headers, reference: OffsetDateTime) -> Evaluation {
        let cc = cache_control(headers);
        if cc.no_store {
            return Evaluation::NotCacheable;
        }

        let (lifetime, source) = if let Some(n) = cc.s_maxage {
            (n, LifetimeSource::SMaxAge)
        } else if let Some(n) = cc.max_age {
            (n, LifetimeSource::MaxAge)
        } else if let Some(n) = expires_lifetime(headers, reference) {
            (n, LifetimeSource::Expires)
        } else {
            (self.default_lifetime, LifetimeSource::Default)
        };

        Evaluation::Cacheable(metadata(headers, &cc, reference, lifetime, source))
    }

    /// Evaluates a stored response after the origin confirmed it with `304`.
    ///
    /// `merged` holds the stored headers updated with the 304's headers. When
    /// the 304 itself carries a lifetime (`Cache-Control` or a valid
    /// `Expires`) the merged headers are evaluated afresh; otherwise the
    /// previous lifetime `max_age` is applied again. Either way the lifetime
    /// counts from the 304's `Date`, or `now` when it has none, never from
    /// the stored response's `Date`.
    pub fn reevaluate(
        &self,
        merged: &Headers,
        not_modified: &Headers,
        max_age: u64,
        now: OffsetDateTime,
    ) -> Evaluation {
        let own_cc = cache_control(not_modified);
        let carries_lifetime = own_cc.lifetime().is_some()
            || not_modified
                .get("expires")
                .and_then(parse_http_date)
                .is_some();
        let reference = reference_time(not_modified, now);
        if carries_lifetime {
            return self.evaluate_from(merged, reference);
        }

        let cc = cache_control(merged);
        if cc.no_store {
            return Evaluation::NotCacheable;
        }
        let source = if cc.s_maxage.is_some() {
            LifetimeSource::SMaxAge
        } else if cc.max_age.is_some() {
            LifetimeSource::MaxAge
        } else if merged.contains("expires") {
            LifetimeSource::Expires
        } else {
            LifetimeSource::Default
        };
        Evaluation::Cacheable(metadata(merged, &cc, reference, max_age, source))
    }
}

/// Parses every `Cache-Control` line of `headers` as one directive list.
pub fn cache_control(headers: &Headers) -> CacheControl {
    headers
        .get_joined("cache-control")
        .map(|value| CacheControl::parse(&value))
        .unwrap_or_default()
}

/// The response's `Date`, or `now`, truncated to whole seconds.
fn reference_time(headers: &Headers, now: OffsetDateTime) -> OffsetDateTime {
    headers
        .get("date")
        .and_then(parse_http_date)
        .unwrap_or_else(|| whole_seconds(now))
}

fn whole_seconds(at: OffsetDateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(at.unix_timestamp()).unwrap_or(at)
}

fn expires_lifetime(headers: &Headers, reference: OffsetDateTime) -> Option<u64> {
    let expires = parse_http_date(headers.get("expires")?)?;
    let seconds = (expires - reference).whole_seconds().max(0);
    Some(u64::try_from(seconds).map_or(MAX_DELTA_SECONDS, |s| s.min(MAX_DELTA_SECONDS)))
}

fn metadata(
    headers: &Headers,
    cc: &CacheControl,
    reference: OffsetDateTime,
    lifetime: u64,
    source: LifetimeSource,
) -> EntryMetadata {
    // lifetime is capped at 2^31 seconds, so the cast is lossless.
    let valid_until = reference
        .checked_add(time::Duration::seconds(lifetime as i64))
        .unwrap_or(reference);

    EntryMetadata {
        etag: headers.get("etag").map(str::to_owned),
        last_modified: headers.get("last-modified").map(str::to_owned),
        must_revalidate: cc.requires_revalidation(),
        valid_until,
        max_age: lifetime,
        source,
    }
}
