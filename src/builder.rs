use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, Capabilities};
use crate::cache::Cache;
use crate::error::BuildError;
use crate::index::ReverseIndex;
use crate::keys::{JsonKeySerializer, KeySerializer};
use crate::metrics::Metrics;
use crate::record::Record;
use crate::registry::KeyRegistry;
use crate::shared::Shared;

const DEFAULT_FANOUT_THRESHOLD: usize = 100;
const DEFAULT_PARTITION_MULTIPLIER: usize = 4;
const DEFAULT_RETRY_BUDGET: u32 = 100;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// A builder for creating `Cache` instances.
///
/// The only required input is the backend adapter; everything else has
/// a default. `build` is the startup hook: it resolves the adapter's
/// capability record once and publishes it with the shared engine state.
pub struct CacheBuilder<R: Record> {
  backend: Option<Arc<dyn Backend<R>>>,
  serializer: Arc<dyn KeySerializer>,
  fanout_threshold: usize,
  partition_multiplier: usize,
  retry_budget: u32,
  retry_backoff: Duration,
}

impl<R: Record> fmt::Debug for CacheBuilder<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("has_backend", &self.backend.is_some())
      .field("fanout_threshold", &self.fanout_threshold)
      .field("partition_multiplier", &self.partition_multiplier)
      .field("retry_budget", &self.retry_budget)
      .field("retry_backoff", &self.retry_backoff)
      .finish_non_exhaustive()
  }
}

impl<R: Record> Default for CacheBuilder<R> {
  fn default() -> Self {
    Self::new()
  }
}

impl<R: Record> CacheBuilder<R> {
  pub fn new() -> Self {
    Self {
      backend: None,
      serializer: Arc::new(JsonKeySerializer),
      fanout_threshold: DEFAULT_FANOUT_THRESHOLD,
      partition_multiplier: DEFAULT_PARTITION_MULTIPLIER,
      retry_budget: DEFAULT_RETRY_BUDGET,
      retry_backoff: DEFAULT_RETRY_BACKOFF,
    }
  }

  /// Sets the backend adapter.
  pub fn backend<B: Backend<R>>(self, backend: B) -> Self {
    self.shared_backend(Arc::new(backend))
  }

  /// Sets an already-shared backend adapter. Useful when the caller keeps
  /// its own handle to the store.
  pub fn shared_backend(mut self, backend: Arc<dyn Backend<R>>) -> Self {
    self.backend = Some(backend);
    self
  }

  /// Replaces the canonical JSON key serializer.
  pub fn serializer<S: KeySerializer>(mut self, serializer: S) -> Self {
    self.serializer = Arc::new(serializer);
    self
  }

  /// Association and eviction fan-outs larger than this run with bounded
  /// parallelism. Defaults to 100.
  pub fn fanout_threshold(mut self, threshold: usize) -> Self {
    self.fanout_threshold = threshold;
    self
  }

  /// The set-lock table holds `schedulers × multiplier` partitions.
  /// Defaults to 4.
  pub fn partition_multiplier(mut self, multiplier: usize) -> Self {
    self.partition_multiplier = multiplier;
    self
  }

  /// How many times a set mutation retries its lock partition before
  /// failing with `LockTimeout`. Defaults to 100.
  pub fn lock_retry_budget(mut self, budget: u32) -> Self {
    self.retry_budget = budget;
    self
  }

  /// The pause between lock acquisition attempts. Defaults to 1 ms.
  pub fn lock_retry_backoff(mut self, backoff: Duration) -> Self {
    self.retry_backoff = backoff;
    self
  }

  /// Validates the configuration, probes the adapter's capabilities and
  /// assembles the cache.
  pub async fn build(self) -> Result<Cache<R>, BuildError> {
    let backend = self.backend.ok_or(BuildError::MissingBackend)?;
    if self.partition_multiplier == 0 {
      return Err(BuildError::ZeroPartitions);
    }
    if self.retry_budget == 0 {
      return Err(BuildError::ZeroRetryBudget);
    }
    if self.fanout_threshold == 0 {
      return Err(BuildError::ZeroFanout);
    }

    let capabilities = Capabilities::resolve(&*backend).await;
    let index = ReverseIndex::new(
      backend.clone(),
      capabilities,
      self.partition_multiplier,
      self.retry_budget,
      self.retry_backoff,
    );

    Ok(Cache {
      shared: Arc::new(Shared {
        backend,
        serializer: self.serializer,
        registry: KeyRegistry::new(),
        index,
        metrics: Metrics::new(),
        capabilities,
        fanout_threshold: self.fanout_threshold,
      }),
    })
  }
}
