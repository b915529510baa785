use crossbeam_utils::CachePadded;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::backend::{Backend, Stored};
use crate::error::{BackendError, LockTimeout, SetOpError};

/// The number of schedulers available to this process, computed once.
static SCHEDULERS: Lazy<usize> = Lazy::new(|| {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(1)
});

pub(crate) fn scheduler_count() -> usize {
  *SCHEDULERS
}

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
fn hash_key<H: BuildHasher>(hasher: &H, key: &str) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// Emulates atomic set mutations on backends without native set support.
///
/// Each set is stored as a single `Stored::Ids` value under its own key;
/// every mutation is a read-modify-write serialized by a partitioned
/// in-process lock table. Holding a partition grants exclusive permission
/// to read-modify-write any set whose key hashes there.
///
/// The lock state is strictly in-process; distributed deployments need a
/// backend with native sets instead.
pub(crate) struct SetLock<R>
where
  R: Clone + Send + Sync + 'static,
{
  partitions: Box<[CachePadded<Mutex<()>>]>,
  hasher: ahash::RandomState,
  retry_budget: u32,
  backoff: Duration,
  backend: Arc<dyn Backend<R>>,
}

impl<R> SetLock<R>
where
  R: Clone + Send + Sync + 'static,
{
  /// Creates a lock table of `scheduler_count × multiplier` partitions.
  pub(crate) fn new(
    backend: Arc<dyn Backend<R>>,
    multiplier: usize,
    retry_budget: u32,
    backoff: Duration,
  ) -> Self {
    let count = scheduler_count() * multiplier;
    let mut partitions = Vec::with_capacity(count);
    for _ in 0..count {
      partitions.push(CachePadded::new(Mutex::new(())));
    }

    Self {
      partitions: partitions.into_boxed_slice(),
      hasher: ahash::RandomState::new(),
      retry_budget,
      backoff,
      backend,
    }
  }

  /// Acquires the partition for `set_key`, retrying with backoff up to the
  /// budget. Budget exhaustion surfaces livelock; under normal load a
  /// partition is never contended for more than a handful of attempts.
  async fn acquire(&self, set_key: &str) -> Result<MutexGuard<'_, ()>, LockTimeout> {
    let index = (hash_key(&self.hasher, set_key) % self.partitions.len() as u64) as usize;
    let partition = &self.partitions[index];

    for _ in 0..self.retry_budget {
      if let Ok(guard) = partition.try_lock() {
        return Ok(guard);
      }
      tokio::time::sleep(self.backoff).await;
    }

    Err(LockTimeout {
      key: set_key.to_string(),
      attempts: self.retry_budget,
    })
  }

  /// Inserts `member` into the set at `set_key`. Idempotent on duplicates.
  pub(crate) async fn sadd(&self, set_key: &str, member: u64) -> Result<(), SetOpError> {
    let _guard = self.acquire(set_key).await?;

    let mut ids = match self.backend.get(set_key).await? {
      Some(Stored::Ids(ids)) => ids,
      Some(Stored::Value(_)) => {
        warn!(key = set_key, "cache value found under reserved set key");
        HashSet::new()
      }
      None => HashSet::new(),
    };

    if !ids.insert(member) {
      return Ok(());
    }
    self.backend.put(set_key, Stored::Ids(ids), None).await?;
    Ok(())
  }

  /// Removes `member` from the set at `set_key`. Removing the last member
  /// deletes the key.
  pub(crate) async fn srem(&self, set_key: &str, member: u64) -> Result<(), SetOpError> {
    let _guard = self.acquire(set_key).await?;

    let mut ids = match self.backend.get(set_key).await? {
      Some(Stored::Ids(ids)) => ids,
      Some(Stored::Value(_)) => {
        warn!(key = set_key, "cache value found under reserved set key");
        return Ok(());
      }
      None => return Ok(()),
    };

    if !ids.remove(&member) {
      return Ok(());
    }
    if ids.is_empty() {
      self.backend.delete(set_key).await?;
    } else {
      self.backend.put(set_key, Stored::Ids(ids), None).await?;
    }
    Ok(())
  }

  /// Reads the set at `set_key` without holding its partition. Absent and
  /// empty sets are both `None`; order is unspecified.
  pub(crate) async fn smembers(&self, set_key: &str) -> Result<Option<Vec<u64>>, BackendError> {
    match self.backend.get(set_key).await? {
      Some(Stored::Ids(ids)) if !ids.is_empty() => Ok(Some(ids.into_iter().collect())),
      Some(Stored::Value(_)) => {
        warn!(key = set_key, "cache value found under reserved set key");
        Ok(None)
      }
      _ => Ok(None),
    }
  }

  /// Sequential individual reads, one slot per input key.
  pub(crate) async fn mget(
    &self,
    keys: &[String],
  ) -> Result<Vec<Option<Stored<R>>>, BackendError> {
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
      values.push(self.backend.get(key).await?);
    }
    Ok(values)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::MemoryBackend;

  fn new_lock(budget: u32) -> SetLock<i32> {
    let backend: Arc<MemoryBackend<i32>> = Arc::new(MemoryBackend::new());
    SetLock::new(backend, 4, budget, Duration::from_millis(1))
  }

  #[tokio::test]
  async fn sadd_srem_smembers_round() {
    let lock = new_lock(100);

    lock.sadd("__set:T:1", 7).await.unwrap();
    lock.sadd("__set:T:1", 8).await.unwrap();
    // Duplicate insert is idempotent.
    lock.sadd("__set:T:1", 7).await.unwrap();

    let mut members = lock.smembers("__set:T:1").await.unwrap().unwrap();
    members.sort_unstable();
    assert_eq!(members, vec![7, 8]);

    lock.srem("__set:T:1", 7).await.unwrap();
    assert_eq!(lock.smembers("__set:T:1").await.unwrap(), Some(vec![8]));

    // Removing the last member leaves the key absent.
    lock.srem("__set:T:1", 8).await.unwrap();
    assert_eq!(lock.smembers("__set:T:1").await.unwrap(), None);

    // Removing from an absent set is a no-op.
    lock.srem("__set:T:1", 8).await.unwrap();
  }

  #[tokio::test]
  async fn mget_preserves_slots() {
    let lock = new_lock(100);
    lock.sadd("__set:A", 1).await.unwrap();

    let values = lock
      .mget(&["__set:A".to_string(), "__set:B".to_string()])
      .await
      .unwrap();
    assert_eq!(values.len(), 2);
    assert!(values[0].is_some());
    assert!(values[1].is_none());
  }

  #[tokio::test]
  async fn contended_partition_times_out() {
    let lock = new_lock(3);

    let _held = lock.acquire("__set:T:1").await.unwrap();
    let err = lock.sadd("__set:T:1", 1).await.unwrap_err();
    match err {
      SetOpError::Lock(timeout) => {
        assert_eq!(timeout.key, "__set:T:1");
        assert_eq!(timeout.attempts, 3);
      }
      other => panic!("expected lock timeout, got {:?}", other),
    }
  }
}
