//! # Cache Crate
//!
//! TTL-aware artifact storage shared by the foreground path and the
//! background pipelines.
//!
//! ## Architecture
//!
//! ```text
//! ArtifactCache               <- artifact codec, freshness, metrics on every exit path
//!   └── dyn CacheBackend      <- raw string key/value with expiry hints
//!         ├── RedisStore      <- networked, native SET EX / SCAN MATCH
//!         └── FileStore       <- one JSON envelope per key, emulated expiry
//! ```
//!
//! Backend failures never escape `ArtifactCache`: every operation degrades
//! to `false` / `None` / `0` and is counted as an error in `CacheMetrics`.
//! `connect_store` picks the configured backend and falls back to the file
//! store when the primary cannot be reached.

pub mod backend;
pub mod factory;
pub mod file_store;
pub mod pattern;
pub mod redis_store;
pub mod store;

pub use backend::{CacheBackend, StoreError, StoreResult};
pub use factory::{connect_store, select_backend, BackendKind, CacheConfig};
pub use file_store::FileStore;
pub use pattern::GlobPattern;
pub use redis_store::RedisStore;
pub use store::ArtifactCache;
