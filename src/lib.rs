// src/lib.rs

//! Invalidation-aware caching over pluggable key-value backends.
//!
//! Scour layers a reverse index over any `get`/`put`/`delete` store:
//! callers tag cached values with the identities of the domain records
//! they contain, and on mutation of any such record the engine evicts or
//! rewrites every cache entry that contains it. Backends with native set
//! operations get single-operation index atomicity; plain key-value
//! backends stay correct through a partitioned-lock fallback that
//! serializes set read-modify-writes in process.
//!
//! The cache is advisory by design: a failed cache operation never
//! corrupts the caller's domain state, it at worst costs an extra fetch
//! on the next read.

pub mod backend;
pub mod builder;
pub mod cache;
pub mod error;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod record;
pub mod registry;

mod index;
mod set_lock;
mod shared;

// Public re-exports for convenience.
pub use backend::{Backend, Capabilities, CommandReply, Stored};
pub use builder::CacheBuilder;
pub use cache::{Cache, WriteStrategy};
pub use error::{BackendError, BuildError, Error, LockTimeout};
pub use keys::{JsonKeySerializer, KeySerializer, Params};
pub use memory::MemoryBackend;
pub use metrics::MetricsSnapshot;
pub use record::{Identity, Payload, Record, Scalar, SET_PREFIX};
pub use registry::KeyRegistry;
