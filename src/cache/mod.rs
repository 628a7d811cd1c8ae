//! Cache layer: client trait, backends, result cache and pre-warmer.
//!
//! Everything here is advisory. The orchestration path must never fail
//! because the cache is down; errors are swallowed and logged at the call
//! sites, and losing the cache loses only performance.

pub mod client;
pub mod memory;
pub mod prewarm;
pub mod redis;
pub mod result_cache;

pub use self::redis::RedisCache;
pub use client::{CacheClient, CacheError};
pub use memory::MemoryCache;
pub use prewarm::{CacheWarmer, ReferenceData};
pub use result_cache::{params_hash, ResultCache};
