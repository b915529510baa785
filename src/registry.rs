use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bidirectional, monotonically growing map between cache-key strings and
/// compact integer identifiers.
///
/// All reverse-index membership is expressed in these identifiers rather
/// than key strings; at scale the savings are roughly tenfold. Identifiers
/// are never reused within a process lifetime, which the 64-bit space
/// makes safe indefinitely. The registry is process-local: cross-process
/// backends must not attempt to reuse identifiers.
#[derive(Debug, Default)]
pub struct KeyRegistry {
  forward: DashMap<String, u64>,
  reverse: DashMap<u64, String>,
  counter: AtomicU64,
}

impl KeyRegistry {
  pub fn new() -> Self {
    Self {
      forward: DashMap::new(),
      reverse: DashMap::new(),
      counter: AtomicU64::new(0),
    }
  }

  /// Returns the identifier bound to `cache_key`, creating one if none
  /// exists.
  ///
  /// Idempotent under concurrency: any number of concurrent registrations
  /// of the same string return the same identifier, and no two distinct
  /// strings ever share one. A registration that loses the insert race
  /// abandons its speculatively drawn counter value.
  pub fn register(&self, cache_key: &str) -> u64 {
    if let Some(id) = self.forward.get(cache_key) {
      return *id.value();
    }

    // Counter values start at 1; identifiers are always positive.
    let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
    match self.forward.entry(cache_key.to_string()) {
      Entry::Occupied(existing) => *existing.get(),
      Entry::Vacant(slot) => {
        slot.insert(id);
        // The reverse direction is written only after the forward
        // insertion has won.
        self.reverse.insert(id, cache_key.to_string());
        id
      }
    }
  }

  /// Looks up the cache key bound to `id`, if any.
  pub fn lookup(&self, id: u64) -> Option<String> {
    self.reverse.get(&id).map(|key| key.value().clone())
  }

  /// Resolves `ids` to `(id, cache_key)` pairs, keeping only those that
  /// still exist.
  pub fn resolve(&self, ids: &[u64]) -> Vec<(u64, String)> {
    ids
      .iter()
      .filter_map(|id| self.reverse.get(id).map(|key| (*id, key.value().clone())))
      .collect()
  }

  /// Removes both directions of `id`'s mapping; a no-op when absent.
  pub fn unregister(&self, id: u64) {
    if let Some((_, cache_key)) = self.reverse.remove(&id) {
      // Guard against the key having been re-registered under a newer id.
      self.forward.remove_if(&cache_key, |_, bound| *bound == id);
    }
  }

  /// The number of live registrations.
  pub fn len(&self) -> usize {
    self.forward.len()
  }

  pub fn is_empty(&self) -> bool {
    self.forward.is_empty()
  }
}
