use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::backend::{Backend, Capabilities, Stored};
use crate::error::{LockTimeout, SetOpError};
use crate::index::ReverseIndex;
use crate::keys::KeySerializer;
use crate::metrics::Metrics;
use crate::record::{Identity, Payload, Record};
use crate::registry::KeyRegistry;
use crate::set_lock::scheduler_count;

/// The internal, thread-safe core of the engine.
pub(crate) struct Shared<R: Record> {
  pub(crate) backend: Arc<dyn Backend<R>>,
  pub(crate) serializer: Arc<dyn KeySerializer>,
  pub(crate) registry: KeyRegistry,
  pub(crate) index: ReverseIndex<R>,
  pub(crate) metrics: Metrics,
  pub(crate) capabilities: Capabilities,
  pub(crate) fanout_threshold: usize,
}

/// What a sweep over a reverse-index set does to each live entry.
pub(crate) enum Sweep<'a, R> {
  /// Delete the entry and retire its membership and registration.
  Evict,
  /// Overwrite the entry in place with `record`, keeping the membership.
  WriteThrough {
    record: &'a R,
    ttl: Option<Duration>,
  },
}

impl<R: Record> Shared<R> {
  /// Downgrades a failed set mutation to a warning unless the lock budget
  /// ran out. Backend faults here are advisory: the membership will be
  /// corrected on the next mutation of the same identity.
  fn note(&self, set_key: &str, result: Result<(), SetOpError>) -> Result<(), LockTimeout> {
    match result {
      Ok(()) => Ok(()),
      Err(SetOpError::Backend(err)) => {
        warn!(key = set_key, error = %err, "index mutation failed, deferring to next mutation");
        Ok(())
      }
      Err(SetOpError::Lock(timeout)) => Err(timeout),
    }
  }

  /// Records `cache_key → payload` in the reverse index: one instance
  /// membership per contained record, plus a type membership when the
  /// payload is a collection.
  pub(crate) async fn associate(
    &self,
    cache_key: &str,
    payload: &Payload<R>,
  ) -> Result<(), LockTimeout> {
    let id = self.registry.register(cache_key);

    match payload {
      Payload::One(record) => {
        let set_key = Identity::of(record).instance_set_key();
        self.note(&set_key, self.index.sadd(&set_key, id).await)
      }
      Payload::Many(records) => {
        if records.len() > self.fanout_threshold {
          stream::iter(records.iter())
            .map(Ok::<_, LockTimeout>)
            .try_for_each_concurrent(scheduler_count(), |record| async move {
              let set_key = Identity::of(record).instance_set_key();
              self.note(&set_key, self.index.sadd(&set_key, id).await)
            })
            .await?;
        } else {
          for record in records {
            let set_key = Identity::of(record).instance_set_key();
            self.note(&set_key, self.index.sadd(&set_key, id).await)?;
          }
        }

        // Collections additionally join the type set of their element
        // type, keyed on the first element.
        if let Some(first) = records.first() {
          let type_key = Identity::type_set_key(first.type_tag());
          self.note(&type_key, self.index.sadd(&type_key, id).await)?;
        }
        Ok(())
      }
    }
  }

  /// Walks the reverse-index set at `set_key` and applies `mode` to every
  /// cache entry it still names. Dangling and stale memberships found
  /// along the way are repaired in place.
  pub(crate) async fn sweep(&self, set_key: &str, mode: Sweep<'_, R>) -> Result<(), LockTimeout> {
    let ids = match self.index.smembers(set_key).await {
      Ok(Some(ids)) => ids,
      Ok(None) => return Ok(()),
      Err(err) => {
        warn!(key = set_key, error = %err, "index read failed, skipping sweep");
        return Ok(());
      }
    };

    let resolved = self.registry.resolve(&ids);

    // Memberships whose id no longer resolves are orphans; drop them.
    let known: HashSet<u64> = resolved.iter().map(|(id, _)| *id).collect();
    for id in ids.iter().copied().filter(|id| !known.contains(id)) {
      self.note(set_key, self.index.srem(set_key, id).await)?;
      self.metrics.stale_repaired.fetch_add(1, Ordering::Relaxed);
    }

    if resolved.is_empty() {
      return Ok(());
    }

    let keys: Vec<String> = resolved.iter().map(|(_, key)| key.clone()).collect();
    let values = match self.index.mget(&keys).await {
      Ok(values) => values,
      Err(err) => {
        // Stale cache entries remain until re-referenced; the next
        // mutation of this identity retries the walk.
        warn!(key = set_key, error = %err, "bulk read failed, leaving cache and index unchanged");
        return Ok(());
      }
    };

    let mut live = Vec::new();
    for ((id, cache_key), value) in resolved.into_iter().zip(values) {
      match value {
        Some(value) => live.push((id, cache_key, value)),
        None => {
          // Registered but gone from the backend: retire the membership
          // and the registration.
          self.note(set_key, self.index.srem(set_key, id).await)?;
          self.registry.unregister(id);
          self.metrics.stale_repaired.fetch_add(1, Ordering::Relaxed);
        }
      }
    }

    match mode {
      Sweep::Evict => self.evict_live(set_key, live).await,
      Sweep::WriteThrough { record, ttl } => {
        self.rewrite_live(live, record, ttl).await;
        Ok(())
      }
    }
  }

  async fn evict_live(
    &self,
    set_key: &str,
    live: Vec<(u64, String, Stored<R>)>,
  ) -> Result<(), LockTimeout> {
    if live.len() > self.fanout_threshold {
      stream::iter(live)
        .map(Ok::<_, LockTimeout>)
        .try_for_each_concurrent(scheduler_count(), |(id, cache_key, _)| async move {
          self.evict_one(set_key, id, &cache_key).await
        })
        .await
    } else {
      for (id, cache_key, _) in live {
        self.evict_one(set_key, id, &cache_key).await?;
      }
      Ok(())
    }
  }

  async fn evict_one(&self, set_key: &str, id: u64, cache_key: &str) -> Result<(), LockTimeout> {
    match self.backend.delete(cache_key).await {
      Ok(()) => {
        self.note(set_key, self.index.srem(set_key, id).await)?;
        self.registry.unregister(id);
        self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
      }
      Err(err) => {
        // The entry and its membership both survive; the next mutation
        // of this identity retries the eviction.
        warn!(key = cache_key, error = %err, "eviction failed, deferring to next mutation");
        Ok(())
      }
    }
  }

  async fn rewrite_live(&self, live: Vec<(u64, String, Stored<R>)>, record: &R, ttl: Option<Duration>) {
    let identity = Identity::of(record);

    if live.len() > self.fanout_threshold {
      stream::iter(live)
        .for_each_concurrent(scheduler_count(), |(_, cache_key, value)| {
          let identity = &identity;
          async move {
            self.rewrite_one(&cache_key, value, record, identity, ttl).await;
          }
        })
        .await;
    } else {
      for (_, cache_key, value) in live {
        self.rewrite_one(&cache_key, value, record, &identity, ttl).await;
      }
    }
  }

  /// Overwrites one live entry in place. Collection rewrites are not
  /// atomic with respect to concurrent writers; a clobbered write is
  /// reconstructed from source on the next cache miss.
  async fn rewrite_one(
    &self,
    cache_key: &str,
    value: Stored<R>,
    record: &R,
    identity: &Identity,
    ttl: Option<Duration>,
  ) {
    let next = match value {
      Stored::Value(Payload::One(_)) => Some(Payload::One(record.clone())),
      Stored::Value(Payload::Many(mut records)) => {
        match records
          .iter()
          .position(|element| Identity::of(element) == *identity)
        {
          Some(position) => {
            records[position] = record.clone();
            Some(Payload::Many(records))
          }
          // The list does not currently contain this identity.
          None => None,
        }
      }
      Stored::Ids(_) => {
        warn!(key = cache_key, "set value found under indexed cache key");
        None
      }
    };

    if let Some(payload) = next {
      match self.backend.put(cache_key, Stored::Value(payload), ttl).await {
        Ok(()) => {
          self.metrics.write_throughs.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
          warn!(key = cache_key, error = %err, "write-through failed, entry left as-is");
        }
      }
    }
  }
}
