use std::fmt;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::backend::{Capabilities, Stored};
use crate::error::{BackendError, Error, LockTimeout};
use crate::keys::Params;
use crate::metrics::MetricsSnapshot;
use crate::record::{Identity, Payload, Record};
use crate::registry::KeyRegistry;
use crate::shared::{Shared, Sweep};

/// How a mutation propagates to the cache entries containing its record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteStrategy {
  /// Evict every entry that contains the record.
  #[default]
  Evict,
  /// Overwrite every entry that contains the record, in place. Collection
  /// rewrites are not atomic; callers that need linearizable writes must
  /// use `Evict`.
  WriteThrough { ttl: Option<Duration> },
}

/// A thread-safe, invalidation-aware cache over a key-value backend.
///
/// Cloning is cheap and shares the underlying engine.
pub struct Cache<R: Record> {
  pub(crate) shared: Arc<Shared<R>>,
}

impl<R: Record> Clone for Cache<R> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<R: Record> fmt::Debug for Cache<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache")
      .field("capabilities", &self.shared.capabilities)
      .field("metrics", &self.shared.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<R: Record> Cache<R> {
  /// Reads through the cache.
  ///
  /// On a hit the cached payload is returned as-is. On a miss `fetch`
  /// materializes the value from the source of truth; a singular record or
  /// a non-empty collection is cached and indexed, an empty collection is
  /// returned without caching, and a fetch error passes through untouched.
  ///
  /// If the backend cannot serve the lookup the read fails open: the
  /// fetch result is returned uncached.
  pub async fn read<F, Fut, E>(
    &self,
    key: &str,
    params: &Params,
    ttl: Option<Duration>,
    fetch: F,
  ) -> Result<Payload<R>, Error<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Payload<R>, E>>,
  {
    let cache_key = self.shared.serializer.derive(key, params);

    match self.shared.backend.get(&cache_key).await {
      Ok(Some(Stored::Value(payload))) => {
        self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(payload);
      }
      Ok(Some(Stored::Ids(_))) => {
        warn!(key = %cache_key, "set value found under cache key, treating as miss");
        self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
      }
      Ok(None) => {
        self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
      }
      Err(err) => {
        // Fail-open read-through: the fetch result is intentionally not
        // cached while the backend is degraded.
        warn!(key = %cache_key, error = %err, "backend read failed, serving fetch uncached");
        return fetch().await.map_err(Error::Source);
      }
    }

    let payload = fetch().await.map_err(Error::Source)?;

    let cacheable = match &payload {
      Payload::One(_) => true,
      Payload::Many(records) => !records.is_empty(),
    };
    if cacheable {
      match self
        .shared
        .backend
        .put(&cache_key, Stored::Value(payload.clone()), ttl)
        .await
      {
        Ok(()) => {
          self.shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
          self.shared.associate(&cache_key, &payload).await?;
        }
        Err(err) => {
          warn!(key = %cache_key, error = %err, "backend write failed, serving fetch uncached");
        }
      }
    }

    Ok(payload)
  }

  /// Runs a creation, then evicts every cached *collection* of the new
  /// record's type so the next listing read re-fetches one that includes
  /// it. Non-`Ok` results pass through untouched.
  pub async fn create<F, Fut, E>(&self, op: F) -> Result<R, Error<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
  {
    let record = op().await.map_err(Error::Source)?;
    self.flush_new(&record).await?;
    Ok(record)
  }

  /// Runs an update with the default `Evict` strategy.
  pub async fn update<F, Fut, E>(&self, op: F) -> Result<R, Error<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
  {
    self.update_with(op, WriteStrategy::default()).await
  }

  /// Runs an update, then propagates the new record to every cache entry
  /// that contains it, per `strategy`. Non-`Ok` results pass through.
  pub async fn update_with<F, Fut, E>(
    &self,
    op: F,
    strategy: WriteStrategy,
  ) -> Result<R, Error<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
  {
    let record = op().await.map_err(Error::Source)?;
    match strategy {
      WriteStrategy::Evict => self.flush(&record).await?,
      WriteStrategy::WriteThrough { ttl } => self.write_through(&record, ttl).await?,
    }
    Ok(record)
  }

  /// Runs a deletion, then evicts every cache entry containing the
  /// deleted record. Non-`Ok` results pass through.
  pub async fn delete<F, Fut, E>(&self, op: F) -> Result<R, Error<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
  {
    let record = op().await.map_err(Error::Source)?;
    self.flush(&record).await?;
    Ok(record)
  }

  /// Evicts every cache entry that contains `record`, repairing stale
  /// index memberships along the way.
  pub async fn flush(&self, record: &R) -> Result<(), LockTimeout> {
    let set_key = Identity::of(record).instance_set_key();
    self.shared.sweep(&set_key, Sweep::Evict).await
  }

  /// Evicts every cached collection of `record`'s type. Instance-only
  /// entries are untouched.
  pub async fn flush_new(&self, record: &R) -> Result<(), LockTimeout> {
    let set_key = Identity::type_set_key(record.type_tag());
    self.shared.sweep(&set_key, Sweep::Evict).await
  }

  /// Overwrites every cache entry that contains `record`, in place:
  /// singular entries become `record`, collections have the element with
  /// the same identity replaced. Entries that no longer contain the
  /// identity are left untouched.
  pub async fn write_through(&self, record: &R, ttl: Option<Duration>) -> Result<(), LockTimeout> {
    let set_key = Identity::of(record).instance_set_key();
    self
      .shared
      .sweep(&set_key, Sweep::WriteThrough { record, ttl })
      .await
  }

  /// Drops the single entry derived from `(key, params)`, bypassing the
  /// reverse index. Its memberships are repaired lazily by the next flush
  /// of an identity it contained.
  pub async fn evict(&self, key: &str, params: &Params) -> Result<(), BackendError> {
    let cache_key = self.shared.serializer.derive(key, params);
    self.shared.backend.delete(&cache_key).await?;
    self
      .shared
      .metrics
      .invalidations
      .fetch_add(1, Ordering::Relaxed);
    Ok(())
  }

  /// Whether the entry derived from `(key, params)` is currently cached.
  pub async fn contains(&self, key: &str, params: &Params) -> bool {
    let cache_key = self.shared.serializer.derive(key, params);
    matches!(
      self.shared.backend.get(&cache_key).await,
      Ok(Some(Stored::Value(_)))
    )
  }

  /// A point-in-time snapshot of the engine's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// The adapter capabilities resolved at build time.
  pub fn capabilities(&self) -> Capabilities {
    self.shared.capabilities
  }

  /// Read-side diagnostic access to the key registry.
  pub fn registry(&self) -> &KeyRegistry {
    &self.shared.registry
  }
}
