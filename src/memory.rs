use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use crate::backend::{Backend, CommandReply, Stored};
use crate::error::BackendError;

/// A minimal in-process backend: one keyed table for values, one
/// multi-valued table for sets.
///
/// Supplies every optional operation natively, including the raw command
/// pipe, which makes it the conformance reference for adapter behavior.
/// TTL is accepted and ignored.
pub struct MemoryBackend<R> {
  values: RwLock<HashMap<String, Stored<R>>>,
  sets: RwLock<HashMap<String, HashSet<u64>>>,
}

impl<R> MemoryBackend<R> {
  pub fn new() -> Self {
    Self {
      values: RwLock::new(HashMap::new()),
      sets: RwLock::new(HashMap::new()),
    }
  }

  /// The number of stored values, sets excluded.
  pub fn len(&self) -> usize {
    self.values.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.read().is_empty()
  }
}

impl<R> Default for MemoryBackend<R> {
  fn default() -> Self {
    Self::new()
  }
}

impl<R> fmt::Debug for MemoryBackend<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoryBackend")
      .field("values", &self.values.read().len())
      .field("sets", &self.sets.read().len())
      .finish()
  }
}

#[async_trait]
impl<R> Backend<R> for MemoryBackend<R>
where
  R: Clone + Send + Sync + 'static,
{
  async fn get(&self, key: &str) -> Result<Option<Stored<R>>, BackendError> {
    Ok(self.values.read().get(key).cloned())
  }

  async fn put(
    &self,
    key: &str,
    value: Stored<R>,
    _ttl: Option<Duration>,
  ) -> Result<(), BackendError> {
    self.values.write().insert(key.to_string(), value);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), BackendError> {
    self.values.write().remove(key);
    Ok(())
  }

  async fn set_add(&self, key: &str, member: u64) -> Result<(), BackendError> {
    self
      .sets
      .write()
      .entry(key.to_string())
      .or_default()
      .insert(member);
    Ok(())
  }

  async fn set_remove(&self, key: &str, member: u64) -> Result<(), BackendError> {
    let mut sets = self.sets.write();
    if let Some(members) = sets.get_mut(key) {
      members.remove(&member);
      if members.is_empty() {
        sets.remove(key);
      }
    }
    Ok(())
  }

  async fn set_members(&self, key: &str) -> Result<Option<Vec<u64>>, BackendError> {
    let sets = self.sets.read();
    match sets.get(key) {
      Some(members) if !members.is_empty() => Ok(Some(members.iter().copied().collect())),
      _ => Ok(None),
    }
  }

  async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Stored<R>>>, BackendError> {
    let values = self.values.read();
    Ok(keys.iter().map(|key| values.get(key).cloned()).collect())
  }

  async fn command(&self, argv: &[String]) -> Result<CommandReply, BackendError> {
    fn member(argv: &[String]) -> Result<u64, BackendError> {
      argv
        .get(2)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| BackendError::Unavailable("malformed set member".to_string()))
    }

    let (cmd, key) = match (argv.first(), argv.get(1)) {
      (Some(cmd), Some(key)) => (cmd.as_str(), key.as_str()),
      _ => return Err(BackendError::Unavailable("malformed command".to_string())),
    };

    match cmd {
      "SADD" => {
        let inserted = self
          .sets
          .write()
          .entry(key.to_string())
          .or_default()
          .insert(member(argv)?);
        Ok(CommandReply::Int(inserted as i64))
      }
      "SREM" => {
        let wanted = member(argv)?;
        let mut sets = self.sets.write();
        let removed = match sets.get_mut(key) {
          Some(members) => {
            let removed = members.remove(&wanted);
            if members.is_empty() {
              sets.remove(key);
            }
            removed
          }
          None => false,
        };
        Ok(CommandReply::Int(removed as i64))
      }
      "SMEMBERS" => match self.sets.read().get(key) {
        Some(members) if !members.is_empty() => {
          Ok(CommandReply::Ids(members.iter().copied().collect()))
        }
        _ => Ok(CommandReply::Nil),
      },
      other => Err(BackendError::Unavailable(format!(
        "unknown command `{}`",
        other
      ))),
    }
  }
}
