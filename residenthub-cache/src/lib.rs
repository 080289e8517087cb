//! TTL cache for dashboard collections.
//!
//! [`TtlCache`] stores values with a per-entry time to live. Entries are
//! evicted either lazily, when a read finds them expired, or eagerly by a
//! timer scheduled at write time, whichever comes first. Time and timers are
//! injected ([`Clock`], [`TimerScheduler`]) so the cache is constructed once
//! at startup, shared by `Arc`, and tested against a manual clock.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(TtlCache::new(
//!     Arc::new(SystemClock),
//!     Arc::new(TokioScheduler::try_current()?),
//!     &CacheSettings::default(),
//! ));
//!
//! cache.set(CacheKey::Payments.as_str(), payments, Duration::from_secs(5));
//! if let Some(cached) = cache.get(CacheKey::Payments.as_str()) {
//!     render(cached);
//! }
//! ```

pub mod keys;
pub mod read_through;
pub mod stats;
pub mod timer;
pub mod ttl;

pub use keys::CacheKey;
pub use read_through::{CacheRead, CollectionFetcher, ReadThroughLoader};
pub use residenthub_core::{Clock, ManualClock, SystemClock};
pub use stats::CacheStats;
pub use timer::{ManualScheduler, TimerHandle, TimerScheduler, TimerTask, TokioScheduler};
pub use ttl::TtlCache;
