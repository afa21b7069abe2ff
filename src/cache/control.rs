//! `Cache-Control` directive parsing.

/// Largest delta-seconds value we honour (RFC 9111 §1.2.2).
pub const MAX_DELTA_SECONDS: u64 = 1 << 31;

/// The directives of one (possibly multi-line) `Cache-Control` field.
///
/// Unknown directives are ignored. A numeric directive whose value is not a
/// plain decimal integer is treated as absent.
///
/// # Examples
///
/// ```
/// use proxy_cache::cache::control::CacheControl;
///
/// let cc = CacheControl::parse("Public, S-MaxAge=60, max-age=300");
/// assert_eq!(cc.s_maxage, Some(60));
/// assert_eq!(cc.max_age, Some(300));
/// assert_eq!(cc.lifetime(), Some(60));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub private: bool,
    pub public: bool,
}

impl CacheControl {
    /// Parses a comma-separated directive list. Directive names are case-insensitive.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();

        for directive in value.split(',') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(unquote(arg.trim()))),
                None => (directive, None),
            };

            match name.to_ascii_lowercase().as_str() {
                "no-cache" => cc.no_cache = true,
                "no-store" => cc.no_store = true,
                "must-revalidate" => cc.must_revalidate = true,
                "proxy-revalidate" => cc.proxy_revalidate = true,
                "private" => cc.private = true,
                "public" => cc.public = true,
                // First occurrence wins when a directive is repeated.
                "max-age" if cc.max_age.is_none() => cc.max_age = arg.and_then(delta_seconds),
                "s-maxage" if cc.s_maxage.is_none() => {
                    cc.s_maxage = arg.and_then(delta_seconds)
                }
                _ => {}
            }
        }

        cc
    }

    /// Returns `true` if a stored copy must be checked with the origin before every reuse.
    pub fn requires_revalidation(&self) -> bool {
        self.no_cache || self.must_revalidate || self.proxy_revalidate
    }

    /// The explicit shared-cache lifetime: `s-maxage`, falling back to `max-age`.
    pub fn lifetime(&self) -> Option<u64> {
        self.s_maxage.or(self.max_age)
    }
}

fn unquote(arg: &str) -> &str {
    arg.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(arg)
}

/// Parses a delta-seconds token of any length.
///
/// Only ASCII digits are accepted; values past [`MAX_DELTA_SECONDS`] saturate.
fn delta_seconds(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = token.bytes().try_fold(0u64, |acc, b| {
        acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    });
    Some(value.map_or(MAX_DELTA_SECONDS, |v| v.min(MAX_DELTA_SECONDS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        let cc = CacheControl::parse("no-cache, MUST-REVALIDATE , proxy-revalidate,private");
        assert!(cc.no_cache);
        assert!(cc.must_revalidate);
        assert!(cc.proxy_revalidate);
        assert!(cc.private);
        assert!(!cc.no_store);
        assert!(cc.requires_revalidation());
    }

    #[test]
    fn max_age_is_decimal() {
        assert_eq!(CacheControl::parse("max-age=120").max_age, Some(120));
        assert_eq!(CacheControl::parse("max-age=0").max_age, Some(0));
        assert_eq!(CacheControl::parse("max-age=\"45\"").max_age, Some(45));
        assert_eq!(
            CacheControl::parse("max-age=000000000000000000000000031").max_age,
            Some(31)
        );
    }

    #[test]
    fn malformed_numbers_are_absent() {
        for value in ["max-age=", "max-age=12a", "max-age=-5", "max-age=1.5", "max-age"] {
            assert_eq!(CacheControl::parse(value).max_age, None, "{value}");
        }
        let cc = CacheControl::parse("s-maxage=abc, max-age=30");
        assert_eq!(cc.s_maxage, None);
        assert_eq!(cc.lifetime(), Some(30));
    }

    #[test]
    fn huge_values_saturate() {
        let cc = CacheControl::parse("max-age=99999999999999999999999999");
        assert_eq!(cc.max_age, Some(MAX_DELTA_SECONDS));
    }

    #[test]
    fn s_maxage_wins() {
        let cc = CacheControl::parse("s-maxage=60, max-age=300");
        assert_eq!(cc.lifetime(), Some(60));
    }

    #[test]
    fn directive_names_not_substrings() {
        // "max-age" must not be found inside an unrelated token.
        let cc = CacheControl::parse("x-max-age=5, stale-while-revalidate=10");
        assert_eq!(cc.lifetime(), None);
        assert!(!cc.must_revalidate);
    }
}
