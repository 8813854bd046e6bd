//! Query result cache.
//!
//! Indicator results are memoized per (indicator, filters, options) key with a
//! time-to-live. Fetches for the same key are serialized so that concurrent
//! renders of a stale or missing entry issue a single database query.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! ttl_seconds = 300
//! capacity = 256
//! sweep_interval_seconds = 60
//! ```

mod clock;
mod config;
mod lock;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use store::{CacheError, TtlCache};
