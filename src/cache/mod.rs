//! Processed-artifact cache.
//!
//! Entries are keyed by group, minimize flag and the fingerprint of the
//! group's source bytes, so a changed source misses on its own. The
//! [`PeriodicScheduler`] flushes the whole store every
//! `cache-update-period` seconds.
//!
//! ```toml
//! [cache]
//! capacity = 256
//! ```

mod config;
mod keys;
mod lock;
mod scheduler;
mod store;

pub use config::CacheConfig;
pub use keys::CacheKey;
pub use scheduler::{CacheFlushTask, PeriodicScheduler, PeriodicTask};
pub use store::{LruProcessingCache, ProcessedContent, ProcessingCache};

pub(crate) use lock::{mutex_lock, rw_read, rw_write};
