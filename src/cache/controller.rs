//! Read and write paths of the cache, as seen by the proxy.
//!
//! The controller owns the store and the revalidation client; both are
//! built by the process entry point and injected here.

use bb8::ManageConnection;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, Freshness};
use super::policy;
use super::revalidate::{HttpTransport, RevalidationClient, RevalidationOutcome, Transport};
use crate::http::{Method, Request, Response};
use crate::store::{CacheStore, RedisManager, StoreConnection, StoreError};

/// How a request was answered by the cache.
#[derive(Debug)]
pub enum Lookup {
    /// Served from a fresh entry without contacting the origin.
    Hit(Response),
    /// A stale entry the origin confirmed with `304`.
    Revalidated(Response),
    /// The origin answered revalidation with a new response.
    Replaced(Response),
    /// Nothing stored; fetch from the origin and offer the response to
    /// [`CacheController::store`].
    Miss,
    /// The cache cannot answer this request; go to the origin directly.
    Bypass,
}

impl Lookup {
    /// The response to send, if the cache produced one.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Hit(r) | Self::Revalidated(r) | Self::Replaced(r) => Some(r),
            Self::Miss | Self::Bypass => None,
        }
    }

    /// Replies to `HEAD` carry the head only.
    fn for_method(self, method: &Method) -> Self {
        if *method != Method::Head {
            return self;
        }
        match self {
            Self::Hit(r) => Self::Hit(r.without_body()),
            Self::Revalidated(r) => Self::Revalidated(r.without_body()),
            Self::Replaced(r) => Self::Replaced(r.without_body()),
            other => other,
        }
    }
}

pub struct CacheController<M: ManageConnection = RedisManager, T = HttpTransport> {
    store: CacheStore<M>,
    revalidator: RevalidationClient<T>,
}

impl<M, T> CacheController<M, T>
where
    M: ManageConnection,
    M::Connection: StoreConnection,
    M::Error: Into<StoreError>,
    T: Transport,
{
    pub fn new(store: CacheStore<M>, revalidator: RevalidationClient<T>) -> Self {
        Self { store, revalidator }
    }

    pub fn cache(&self) -> &CacheStore<M> {
        &self.store
    }

    pub fn revalidator(&self) -> &RevalidationClient<T> {
        &self.revalidator
    }

    /// Answers `request` for `uri` from the cache if possible, within the
    /// revalidation timeout.
    pub async fn lookup(&self, uri: &str, request: &Request) -> Lookup {
        self.lookup_until(uri, request, Instant::now() + self.revalidator.timeout())
            .await
    }

    /// [`lookup`](Self::lookup) bounded by the caller's `deadline`.
    ///
    /// The deadline covers the whole lookup: store reads and writes and the
    /// revalidation round trip. What is left of it after the store read is
    /// what revalidation gets. Running out yields [`Lookup::Bypass`] or
    /// [`Lookup::Miss`], never an unverified stale entry.
    pub async fn lookup_until(&self, uri: &str, request: &Request, deadline: Instant) -> Lookup {
        self.lookup_at(uri, request, OffsetDateTime::now_utc(), deadline)
            .await
    }

    /// [`lookup_until`](Self::lookup_until) at wall-clock time `now`.
    pub async fn lookup_at(
        &self,
        uri: &str,
        request: &Request,
        now: OffsetDateTime,
        deadline: Instant,
    ) -> Lookup {
        if !policy::request_is_cacheable(request) {
            debug!(uri, method = %request.method(), "request bypasses cache");
            return Lookup::Bypass;
        }

        let Some(entry) = self.store.get_until(uri, deadline).await else {
            return Lookup::Miss;
        };

        let lookup = match entry.verify(now) {
            Freshness::Fresh => {
                debug!(uri, "cache hit");
                Lookup::Hit(entry.to_response(now))
            }
            Freshness::StaleNeedsRevalidation => {
                self.revalidate(uri, request, entry, now, deadline).await
            }
        };
        lookup.for_method(request.method())
    }

    /// Offers an origin response for storage. Returns whether it was stored.
    pub async fn store(&self, uri: &str, request: &Request, response: &Response) -> bool {
        self.store
            .check_and_store(uri, request, response, OffsetDateTime::now_utc())
            .await
    }

    async fn revalidate(
        &self,
        uri: &str,
        request: &Request,
        entry: CacheEntry,
        now: OffsetDateTime,
        deadline: Instant,
    ) -> Lookup {
        match self.revalidator.revalidate_until(&entry, deadline).await {
            RevalidationOutcome::StillFresh(headers) => {
                match entry.refreshed(self.store.evaluator(), &headers, now) {
                    Some(refreshed) => {
                        if let Err(e) = self.store.put_until(uri, &refreshed, deadline).await {
                            warn!(uri, error = %e, "failed to store revalidated entry");
                        }
                        debug!(uri, "revalidated stale entry");
                        Lookup::Revalidated(refreshed.to_response(now))
                    }
                    None => {
                        // The 304 now forbids storing.
                        self.evict(uri, deadline).await;
                        Lookup::Revalidated(entry.to_response(now))
                    }
                }
            }
            RevalidationOutcome::Changed(response) => {
                // Revalidation always sends GET, so the answer is a full GET
                // response even when the client asked with HEAD.
                let as_get = request.with_method(Method::Get);
                if !self
                    .store
                    .check_and_store_until(uri, &as_get, &response, now, deadline)
                    .await
                {
                    self.evict(uri, deadline).await;
                }
                debug!(uri, status = response.status().as_u16(), "origin replaced stale entry");
                Lookup::Replaced(response)
            }
            RevalidationOutcome::Unreachable(e) => {
                warn!(uri, error = %e, "origin unreachable, bypassing stale entry");
                Lookup::Bypass
            }
        }
    }

    async fn evict(&self, uri: &str, deadline: Instant) {
        if let Err(e) = self.store.delete_until(uri, deadline).await {
            warn!(uri, error = %e, "failed to evict superseded entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;
    use crate::cache::freshness::FreshnessEvaluator;
    use crate::cache::revalidate::tests::FakeOrigin;
    use crate::http::{Method, StatusCode};
    use crate::store::{MemoryManager, PoolConfig};

    const T0: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);
    const URI: &str = "http://origin.test/page";

    fn secs(n: i64) -> time::Duration {
        time::Duration::seconds(n)
    }

    fn controller(origin: FakeOrigin) -> (CacheController<MemoryManager, FakeOrigin>, MemoryManager) {
        let manager = MemoryManager::new();
        let config = PoolConfig {
            capacity: 4,
            max_idle: 2,
            idle_timeout: Duration::from_secs(60),
            wait_timeout: Duration::from_millis(100),
        };
        let store = CacheStore::new(
            config.build(manager.clone()),
            "proxy-cache:",
            FreshnessEvaluator::new(Duration::from_secs(300)),
        );
        let revalidator = RevalidationClient::new(origin, Duration::from_secs(1));
        (CacheController::new(store, revalidator), manager)
    }

    fn get() -> Request {
        Request::new(Method::Get, URI)
    }

    async fn answer(
        controller: &CacheController<MemoryManager, FakeOrigin>,
        request: &Request,
        now: OffsetDateTime,
    ) -> Lookup {
        let deadline = Instant::now() + Duration::from_secs(30);
        controller.lookup_at(URI, request, now, deadline).await
    }

    fn origin_response(cache_control: &str, body: &str) -> Response {
        Response::new(StatusCode::OK)
            .header("Date", "Fri, 01 Mar 2024 12:00:00 GMT")
            .header("Cache-Control", cache_control)
            .header("ETag", "\"abc\"")
            .body(body)
    }

    async fn seed(controller: &CacheController<MemoryManager, FakeOrigin>, cache_control: &str) {
        let stored = controller
            .cache()
            .check_and_store(URI, &get(), &origin_response(cache_control, "original"), T0)
            .await;
        assert!(stored);
    }

    #[tokio::test]
    async fn fresh_then_stale_then_revalidated() {
        let not_modified = Response::new(StatusCode::NOT_MODIFIED).header("Date", "Fri, 01 Mar 2024 12:00:15 GMT");
        let (controller, _) = controller(FakeOrigin::answering(not_modified));
        seed(&controller, "max-age=10").await;

        let Lookup::Hit(hit) = answer(&controller, &get(), T0 + secs(5)).await else {
            panic!("expected a hit at T0+5");
        };
        assert_eq!(hit.headers().get("age"), Some("5"));
        assert!(controller.revalidator().transport().requests().is_empty());

        let Lookup::Revalidated(revalidated) = answer(&controller, &get(), T0 + secs(15)).await else {
            panic!("expected revalidation at T0+15");
        };
        assert_eq!(revalidated.body_ref().as_ref(), b"original");
        let sent = controller.revalidator().transport().requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].headers.get("if-none-match"), Some("\"abc\""));

        // Freshness was extended by the original lifetime from the 304's Date.
        assert!(matches!(
            answer(&controller, &get(), T0 + secs(20)).await,
            Lookup::Hit(_)
        ));
        assert_eq!(controller.revalidator().transport().requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_cache_misses() {
        let (controller, _) = controller(FakeOrigin::failing());
        assert!(matches!(answer(&controller, &get(), T0).await, Lookup::Miss));
    }

    #[tokio::test]
    async fn changed_response_replaces_entry() {
        let fresh = Response::new(StatusCode::OK)
            .header("Date", "Fri, 01 Mar 2024 12:01:00 GMT")
            .header("Cache-Control", "max-age=60")
            .body("updated");
        let (controller, _) = controller(FakeOrigin::answering(fresh));
        seed(&controller, "max-age=10").await;

        let lookup = answer(&controller, &get(), T0 + secs(60)).await;
        let Lookup::Replaced(response) = lookup else {
            panic!("expected a replacement, got {lookup:?}");
        };
        assert_eq!(response.body_ref().as_ref(), b"updated");

        let stored = controller.cache().get(URI).await.unwrap();
        assert_eq!(stored.body().as_ref(), b"updated");
        assert_eq!(stored.max_age(), 60);
    }

    #[tokio::test]
    async fn uncacheable_replacement_evicts_stale_entry() {
        let (controller, manager) = controller(FakeOrigin::answering(
            Response::new(StatusCode::SERVICE_UNAVAILABLE),
        ));
        seed(&controller, "max-age=10").await;

        let lookup = answer(&controller, &get(), T0 + secs(30)).await;
        assert!(matches!(lookup, Lookup::Replaced(ref r) if r.status() == StatusCode::SERVICE_UNAVAILABLE));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn unreachable_origin_bypasses_stale_entry() {
        let (controller, _) = controller(FakeOrigin::failing());
        seed(&controller, "max-age=10").await;

        assert!(matches!(
            answer(&controller, &get(), T0 + secs(30)).await,
            Lookup::Bypass
        ));
        // The entry stays for the next attempt.
        assert!(controller.cache().get(URI).await.is_some());
    }

    #[tokio::test]
    async fn must_revalidate_checks_origin_every_time() {
        let (controller, _) = controller(FakeOrigin::answering(Response::new(StatusCode::NOT_MODIFIED)));
        seed(&controller, "no-cache, max-age=600").await;

        for _ in 0..2 {
            assert!(matches!(
                answer(&controller, &get(), T0 + secs(1)).await,
                Lookup::Revalidated(_)
            ));
        }
        assert_eq!(controller.revalidator().transport().requests().len(), 2);
    }

    #[tokio::test]
    async fn not_modified_with_no_store_evicts() {
        let not_modified = Response::new(StatusCode::NOT_MODIFIED).header("Cache-Control", "no-store");
        let (controller, manager) = controller(FakeOrigin::answering(not_modified));
        seed(&controller, "max-age=10").await;

        let lookup = answer(&controller, &get(), T0 + secs(15)).await;
        assert!(matches!(lookup, Lookup::Revalidated(ref r) if r.body_ref().as_ref() == b"original"));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn ineligible_request_bypasses_without_store_access() {
        let (controller, manager) = controller(FakeOrigin::failing());
        seed(&controller, "max-age=10").await;
        manager.set_available(false);

        let authorized = get().header("Authorization", "Bearer t");
        assert!(matches!(
            answer(&controller, &authorized, T0).await,
            Lookup::Bypass
        ));
        let post = Request::new(Method::Post, URI);
        assert!(matches!(answer(&controller, &post, T0).await, Lookup::Bypass));
    }

    #[tokio::test]
    async fn head_is_served_from_stored_get() {
        let (controller, _) = controller(FakeOrigin::failing());
        seed(&controller, "max-age=10").await;
        let head = Request::new(Method::Head, URI);
        let lookup = answer(&controller, &head, T0 + secs(1)).await;
        let response = lookup.into_response().unwrap();
        assert_eq!(response.headers().get("etag"), Some("\"abc\""));
        assert!(response.body_ref().is_empty());
    }

    #[tokio::test]
    async fn head_revalidation_stores_changed_get_response() {
        let fresh = Response::new(StatusCode::OK)
            .header("Date", "Fri, 01 Mar 2024 12:01:00 GMT")
            .header("Cache-Control", "max-age=60")
            .body("updated");
        let (controller, _) = controller(FakeOrigin::answering(fresh));
        seed(&controller, "max-age=10").await;

        let head = Request::new(Method::Head, URI);
        let lookup = answer(&controller, &head, T0 + secs(60)).await;
        let Lookup::Replaced(response) = lookup else {
            panic!("expected a replacement, got {lookup:?}");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body_ref().is_empty());

        // The full body was kept for later GETs.
        let stored = controller.cache().get(URI).await.unwrap();
        assert_eq!(stored.body().as_ref(), b"updated");
        let Lookup::Hit(hit) = answer(&controller, &get(), T0 + secs(61)).await else {
            panic!("expected a hit for the stored replacement");
        };
        assert_eq!(hit.body_ref().as_ref(), b"updated");
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_bounds_revalidation() {
        let mut origin = FakeOrigin::answering(Response::new(StatusCode::NOT_MODIFIED));
        origin.delay = Duration::from_secs(10);
        let (controller, _) = controller(origin);
        seed(&controller, "max-age=10").await;

        let started = Instant::now();
        let deadline = started + Duration::from_millis(250);
        let lookup = controller
            .lookup_at(URI, &get(), T0 + secs(30), deadline)
            .await;
        assert!(matches!(lookup, Lookup::Bypass));
        assert!(started.elapsed() < Duration::from_secs(1));
        // The stale entry is kept for the next attempt.
        assert!(controller.cache().get(URI).await.is_some());
    }

    #[tokio::test]
    async fn store_outage_is_a_miss() {
        let (controller, manager) = controller(FakeOrigin::failing());
        manager.set_available(false);
        assert!(matches!(answer(&controller, &get(), T0).await, Lookup::Miss));
        assert!(!controller.store(URI, &get(), &origin_response("max-age=60", "x")).await);
    }
}
