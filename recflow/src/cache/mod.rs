//! Result caching.
//!
//! This module provides:
//! - Composite position keys and the content fingerprint chain
//! - The [`CacheManager`] LRU store with disk spill
//! - The [`ResultCache`] seam used by the executor

mod key;
mod manager;
pub mod spill;

pub use key::{composite_key, compute_cache_key, sanitize_key};
pub use manager::{CacheManager, ResultCache, SPILL_THRESHOLD_BYTES};
