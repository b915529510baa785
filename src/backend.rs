use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::BackendError;
use crate::record::Payload;

/// What actually lives in the backend under a key.
///
/// Cache entries are `Value`s. On backends without native set support the
/// reverse-index sets are persisted through the same `get`/`put`/`delete`
/// surface as `Ids` values, serialized by the set lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored<R> {
  Value(Payload<R>),
  Ids(HashSet<u64>),
}

/// A reply from the generic raw-command interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
  Int(i64),
  Ids(Vec<u64>),
  Nil,
}

/// A key-value backend adapter.
///
/// `get`, `put` and `delete` are required. The set operations, `multi_get`
/// and the raw `command` pipe are optional capabilities; their default
/// bodies answer `Unsupported`, which is what the startup probe feature-
/// tests for. A miss is `Ok(None)`, never an error.
///
/// TTL is opaque to the engine: adapters may honor it or ignore it.
#[async_trait]
pub trait Backend<R>: Send + Sync + 'static
where
  R: Clone + Send + Sync + 'static,
{
  async fn get(&self, key: &str) -> Result<Option<Stored<R>>, BackendError>;

  async fn put(
    &self,
    key: &str,
    value: Stored<R>,
    ttl: Option<Duration>,
  ) -> Result<(), BackendError>;

  async fn delete(&self, key: &str) -> Result<(), BackendError>;

  /// Atomically adds `member` to the set at `key`.
  async fn set_add(&self, _key: &str, _member: u64) -> Result<(), BackendError> {
    Err(BackendError::Unsupported("set_add"))
  }

  /// Atomically removes `member` from the set at `key`.
  async fn set_remove(&self, _key: &str, _member: u64) -> Result<(), BackendError> {
    Err(BackendError::Unsupported("set_remove"))
  }

  /// Reads the set at `key`. Absent and empty sets are both `Ok(None)`.
  async fn set_members(&self, _key: &str) -> Result<Option<Vec<u64>>, BackendError> {
    Err(BackendError::Unsupported("set_members"))
  }

  /// Fetches several keys in one round trip, one slot per input key.
  async fn multi_get(&self, _keys: &[String]) -> Result<Vec<Option<Stored<R>>>, BackendError> {
    Err(BackendError::Unsupported("multi_get"))
  }

  /// A generic command pipe for backends that speak a command protocol
  /// (e.g. `SADD`/`SREM`/`SMEMBERS` argv) without surfacing native set
  /// methods.
  async fn command(&self, _argv: &[String]) -> Result<CommandReply, BackendError> {
    Err(BackendError::Unsupported("command"))
  }
}

/// The resolved optional-operation surface of an adapter.
///
/// Resolved exactly once per cache instance at build time; every set or
/// bulk-read call site dispatches on these flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
  /// The adapter has native `set_add`/`set_remove`/`set_members`.
  pub native_sets: bool,
  /// The adapter can run set operations through its raw command pipe.
  pub raw_sets: bool,
  /// The adapter has a native `multi_get`.
  pub multi_get: bool,
}

const PROBE_KEY: &str = "__set:__probe";

impl Capabilities {
  /// Feature-tests the optional operations against a probe key.
  ///
  /// Only `Unsupported` marks a capability absent; a transiently failing
  /// adapter still advertises the operation.
  pub async fn resolve<R, B>(backend: &B) -> Self
  where
    R: Clone + Send + Sync + 'static,
    B: Backend<R> + ?Sized,
  {
    let native_sets = !matches!(
      backend.set_members(PROBE_KEY).await,
      Err(BackendError::Unsupported(_))
    );
    let raw_sets = !matches!(
      backend
        .command(&["SMEMBERS".to_string(), PROBE_KEY.to_string()])
        .await,
      Err(BackendError::Unsupported(_))
    );
    let multi_get = !matches!(
      backend.multi_get(&[PROBE_KEY.to_string()]).await,
      Err(BackendError::Unsupported(_))
    );

    Self {
      native_sets,
      raw_sets,
      multi_get,
    }
  }
}
