//! # proxy-cache
//!
//! Response caching for an HTTP forward/reverse proxy: freshness rules from
//! `Cache-Control`/`Expires`/`Date`, conditional revalidation against the
//! origin, and a pooled shared store (Redis) with atomic store-and-expire.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proxy_cache::cache::{CacheController, Lookup, RevalidationClient};
//! use proxy_cache::config::Settings;
//! use proxy_cache::http::{Method, Request};
//! use proxy_cache::store::CacheStore;
//!
//! async fn serve(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = CacheController::new(
//!         CacheStore::connect(settings)?,
//!         RevalidationClient::from_settings(&settings.revalidation)?,
//!     );
//!
//!     let uri = "http://example.com/";
//!     let request = Request::new(Method::Get, uri);
//!     match controller.lookup(uri, &request).await {
//!         Lookup::Miss => { /* fetch, then controller.store(uri, &request, &response) */ }
//!         Lookup::Bypass => { /* fetch directly */ }
//!         hit => println!("{:?}", hit.into_response().map(|r| r.status())),
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod store;
pub mod telemetry;

pub use cache::{CacheController, CacheEntry, FreshnessEvaluator, Lookup};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use store::{CacheStore, StoreError};
