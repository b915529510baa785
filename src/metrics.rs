use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the engine.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,
  pub(crate) write_throughs: CachePadded<AtomicU64>,
  pub(crate) stale_repaired: CachePadded<AtomicU64>,
  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      write_throughs: CachePadded::new(AtomicU64::new(0)),
      stale_repaired: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      write_throughs: self.write_throughs.load(Ordering::Relaxed),
      stale_repaired: self.stale_repaired.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the engine's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of reads answered from the backend.
  pub hits: u64,
  /// The number of reads that fell through to the fetch callback.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// The total number of payloads written on the read path.
  pub inserts: u64,
  /// The total number of entries evicted by flushes and manual eviction.
  pub invalidations: u64,
  /// The total number of entries rewritten in place.
  pub write_throughs: u64,
  /// The number of dangling or stale index memberships repaired lazily.
  pub stale_repaired: u64,
  /// The number of seconds the engine has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("invalidations", &self.invalidations)
      .field("write_throughs", &self.write_throughs)
      .field("stale_repaired", &self.stale_repaired)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
