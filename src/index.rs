use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, Capabilities, CommandReply, Stored};
use crate::error::{BackendError, SetOpError};
use crate::set_lock::SetLock;

/// The reverse-index set store.
///
/// Every membership mutation flows through here; each call site dispatches
/// on the capability record resolved at startup — native adapter operation
/// first, then the raw-command pipe, then the set-lock fallback. Adapters
/// with genuine server-side sets get single-operation atomicity; plain
/// key-value backends stay correct through serialized read-modify-write.
pub(crate) struct ReverseIndex<R>
where
  R: Clone + Send + Sync + 'static,
{
  backend: Arc<dyn Backend<R>>,
  capabilities: Capabilities,
  fallback: SetLock<R>,
}

impl<R> ReverseIndex<R>
where
  R: Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    backend: Arc<dyn Backend<R>>,
    capabilities: Capabilities,
    partition_multiplier: usize,
    retry_budget: u32,
    backoff: Duration,
  ) -> Self {
    let fallback = SetLock::new(backend.clone(), partition_multiplier, retry_budget, backoff);
    Self {
      backend,
      capabilities,
      fallback,
    }
  }

  pub(crate) async fn sadd(&self, set_key: &str, id: u64) -> Result<(), SetOpError> {
    if self.capabilities.native_sets {
      self.backend.set_add(set_key, id).await?;
      Ok(())
    } else if self.capabilities.raw_sets {
      self
        .backend
        .command(&["SADD".to_string(), set_key.to_string(), id.to_string()])
        .await?;
      Ok(())
    } else {
      self.fallback.sadd(set_key, id).await
    }
  }

  pub(crate) async fn srem(&self, set_key: &str, id: u64) -> Result<(), SetOpError> {
    if self.capabilities.native_sets {
      self.backend.set_remove(set_key, id).await?;
      Ok(())
    } else if self.capabilities.raw_sets {
      self
        .backend
        .command(&["SREM".to_string(), set_key.to_string(), id.to_string()])
        .await?;
      Ok(())
    } else {
      self.fallback.srem(set_key, id).await
    }
  }

  pub(crate) async fn smembers(&self, set_key: &str) -> Result<Option<Vec<u64>>, BackendError> {
    if self.capabilities.native_sets {
      self.backend.set_members(set_key).await
    } else if self.capabilities.raw_sets {
      let reply = self
        .backend
        .command(&["SMEMBERS".to_string(), set_key.to_string()])
        .await?;
      match reply {
        CommandReply::Ids(ids) if !ids.is_empty() => Ok(Some(ids)),
        _ => Ok(None),
      }
    } else {
      self.fallback.smembers(set_key).await
    }
  }

  pub(crate) async fn mget(
    &self,
    keys: &[String],
  ) -> Result<Vec<Option<Stored<R>>>, BackendError> {
    if self.capabilities.multi_get {
      self.backend.multi_get(keys).await
    } else {
      self.fallback.mget(keys).await
    }
  }
}
