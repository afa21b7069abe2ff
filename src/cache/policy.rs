//! Request-side eligibility for a shared cache.

use crate::http::Request;

/// Whether a response to `request` may be served from or written to the cache.
///
/// Only `GET` and `HEAD` qualify. A request carrying `Cache-Control: no-store`
/// or credentials (`Authorization`) always goes to the origin.
pub fn request_is_cacheable(request: &Request) -> bool {
    request.method().is_cacheable()
        && !request.cache_control().no_store
        && !request.headers().contains("authorization")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[test]
    fn plain_get_and_head_are_eligible() {
        assert!(request_is_cacheable(&Request::new(Method::Get, "/a")));
        assert!(request_is_cacheable(&Request::new(Method::Head, "/a")));
    }

    #[test]
    fn unsafe_methods_are_not() {
        for method in [Method::Post, Method::Put, Method::Delete, Method::Patch] {
            assert!(!request_is_cacheable(&Request::new(method, "/a")));
        }
    }

    #[test]
    fn no_store_and_credentials_bypass() {
        let no_store = Request::new(Method::Get, "/a").header("Cache-Control", "max-age=0, No-Store");
        assert!(!request_is_cacheable(&no_store));

        let authorized = Request::new(Method::Get, "/a").header("authorization", "Basic Zm9vOmJhcg==");
        assert!(!request_is_cacheable(&authorized));

        let no_cache = Request::new(Method::Get, "/a").header("Cache-Control", "no-cache");
        assert!(request_is_cacheable(&no_cache));
    }

    #[test]
    fn parsed_request_heads() {
        let raw = b"GET http://origin.test/a HTTP/1.1\r\nHost: origin.test\r\nCache-Control: no-store\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        assert!(!request_is_cacheable(&request));

        let raw = b"HEAD /a HTTP/1.1\r\nHost: origin.test\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        assert!(request_is_cacheable(&request));
    }
}
