//! Content-addressed store keys.

use sha2::{Digest, Sha256};

/// Length of a derived key in characters.
pub const KEY_LEN: usize = 64;

/// Maps a request URI to its fixed-length store key.
///
/// The key is the lowercase hex SHA-256 digest of the URI bytes, so it is
/// always [`KEY_LEN`] printable characters regardless of the URI's length or
/// character set.
///
/// # Examples
///
/// ```
/// use proxy_cache::cache::key::derive;
///
/// let key = derive("http://example.com/");
/// assert_eq!(key.len(), 64);
/// assert_eq!(key, derive("http://example.com/"));
/// ```
pub fn derive(uri: &str) -> String {
    hex::encode(Sha256::digest(uri.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let uri = "http://example.com/a?b=c";
        assert_eq!(derive(uri), derive(uri));
    }

    #[test]
    fn distinct_uris_distinct_keys() {
        let uris = [
            "http://example.com/",
            "http://example.com",
            "http://example.com/a",
            "http://example.com/A",
            "https://example.com/",
        ];
        let keys: std::collections::HashSet<_> = uris.iter().map(|u| derive(u)).collect();
        assert_eq!(keys.len(), uris.len());
    }

    #[test]
    fn fixed_length_printable() {
        let long = "x".repeat(10_000);
        for uri in ["", "/", "http://例え.jp/パス", long.as_str()] {
            let key = derive(uri);
            assert_eq!(key.len(), KEY_LEN);
            assert!(key.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        }
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            derive(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
