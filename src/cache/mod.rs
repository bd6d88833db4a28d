//! Versioned cache store and the strategies that read and write it.
//!
//! - Named buckets ("generations") of request -> response entries
//! - Cache-first for the app shell, network-first for feed data
//! - Offline fallbacks when neither network nor cache can answer

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{open_bucket, CacheStore, SqliteStore};
pub use traits::{CacheGeneration, CacheKey, GenerationKind, Served, ServedFrom};
