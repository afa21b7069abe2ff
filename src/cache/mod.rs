//! HTTP response caching: freshness rules, stored entries, revalidation and
//! the controller that ties them to a [`CacheStore`](crate::store::CacheStore).

pub mod control;
pub mod controller;
pub mod date;
pub mod entry;
pub mod freshness;
pub mod key;
pub mod policy;
pub mod revalidate;

pub use control::CacheControl;
pub use controller::{CacheController, Lookup};
pub use entry::{CacheEntry, Freshness};
pub use freshness::{Evaluation, EntryMetadata, FreshnessEvaluator, LifetimeSource};
pub use revalidate::{
    HttpTransport, OriginRequest, RevalidationClient, RevalidationError, RevalidationOutcome,
    Transport,
};
