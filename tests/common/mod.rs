#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scour::{
  Backend, BackendError, Cache, CacheBuilder, CommandReply, JsonKeySerializer, KeySerializer,
  MemoryBackend, Params, Record, Scalar, Stored,
};

/// The domain record most suites revolve around.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
  pub id: i64,
  pub name: String,
  pub active: bool,
}

impl Record for User {
  fn type_tag(&self) -> &str {
    "User"
  }

  fn primary_key(&self) -> Vec<(&'static str, Scalar)> {
    vec![("id", Scalar::Int(self.id))]
  }
}

pub fn user(id: i64, name: &str) -> User {
  User {
    id,
    name: name.to_string(),
    active: true,
  }
}

/// A two-kind domain for cross-type isolation tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
  User(User),
  Team { id: i64, name: String },
}

impl Record for Domain {
  fn type_tag(&self) -> &str {
    match self {
      Domain::User(_) => "User",
      Domain::Team { .. } => "Team",
    }
  }

  fn primary_key(&self) -> Vec<(&'static str, Scalar)> {
    match self {
      Domain::User(u) => vec![("id", Scalar::Int(u.id))],
      Domain::Team { id, .. } => vec![("id", Scalar::Int(*id))],
    }
  }
}

/// The error type callbacks fail with in these suites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boom;

impl std::fmt::Display for Boom {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "boom")
  }
}

pub fn params(pairs: &[(&str, serde_json::Value)]) -> Params {
  pairs
    .iter()
    .map(|(key, value)| (key.to_string(), value.clone()))
    .collect()
}

/// Derives the same backend key the engine derives.
pub fn cache_key(key: &str, params: &Params) -> String {
  JsonKeySerializer.derive(key, params)
}

pub async fn memory_cache() -> (Arc<MemoryBackend<User>>, Cache<User>) {
  let backend = Arc::new(MemoryBackend::new());
  let cache = CacheBuilder::<User>::new()
    .shared_backend(backend.clone())
    .build()
    .await
    .unwrap();
  (backend, cache)
}

/// A backend stripped down to the three required operations, forcing the
/// engine onto the set-lock fallback and sequential bulk reads.
#[derive(Debug, Default)]
pub struct KvOnlyBackend {
  inner: MemoryBackend<User>,
}

#[async_trait]
impl Backend<User> for KvOnlyBackend {
  async fn get(&self, key: &str) -> Result<Option<Stored<User>>, BackendError> {
    self.inner.get(key).await
  }

  async fn put(
    &self,
    key: &str,
    value: Stored<User>,
    ttl: Option<Duration>,
  ) -> Result<(), BackendError> {
    self.inner.put(key, value, ttl).await
  }

  async fn delete(&self, key: &str) -> Result<(), BackendError> {
    self.inner.delete(key).await
  }
}

pub async fn kv_only_cache() -> (Arc<KvOnlyBackend>, Cache<User>) {
  let backend = Arc::new(KvOnlyBackend::default());
  let cache = CacheBuilder::<User>::new()
    .shared_backend(backend.clone())
    .build()
    .await
    .unwrap();
  (backend, cache)
}

/// A backend that surfaces set operations only through its raw command
/// pipe, the way a generic command client would.
#[derive(Debug, Default)]
pub struct RawCommandBackend {
  inner: MemoryBackend<User>,
}

impl RawCommandBackend {
  pub async fn set_ids(&self, set_key: &str) -> Option<Vec<u64>> {
    self.inner.set_members(set_key).await.unwrap()
  }
}

#[async_trait]
impl Backend<User> for RawCommandBackend {
  async fn get(&self, key: &str) -> Result<Option<Stored<User>>, BackendError> {
    self.inner.get(key).await
  }

  async fn put(
    &self,
    key: &str,
    value: Stored<User>,
    ttl: Option<Duration>,
  ) -> Result<(), BackendError> {
    self.inner.put(key, value, ttl).await
  }

  async fn delete(&self, key: &str) -> Result<(), BackendError> {
    self.inner.delete(key).await
  }

  async fn command(&self, argv: &[String]) -> Result<CommandReply, BackendError> {
    self.inner.command(argv).await
  }
}

/// A fully capable backend whose individual operations can be made to
/// fail, for the fail-open and advisory-error paths.
#[derive(Debug, Default)]
pub struct FlakyBackend {
  inner: MemoryBackend<User>,
  pub fail_get: AtomicBool,
  pub fail_put: AtomicBool,
  pub fail_delete: AtomicBool,
  pub fail_multi_get: AtomicBool,
}

impl FlakyBackend {
  fn down(&self, flag: &AtomicBool) -> Result<(), BackendError> {
    if flag.load(Ordering::SeqCst) {
      Err(BackendError::Unavailable("injected outage".to_string()))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl Backend<User> for FlakyBackend {
  async fn get(&self, key: &str) -> Result<Option<Stored<User>>, BackendError> {
    self.down(&self.fail_get)?;
    self.inner.get(key).await
  }

  async fn put(
    &self,
    key: &str,
    value: Stored<User>,
    ttl: Option<Duration>,
  ) -> Result<(), BackendError> {
    self.down(&self.fail_put)?;
    self.inner.put(key, value, ttl).await
  }

  async fn delete(&self, key: &str) -> Result<(), BackendError> {
    self.down(&self.fail_delete)?;
    self.inner.delete(key).await
  }

  async fn set_add(&self, key: &str, member: u64) -> Result<(), BackendError> {
    self.inner.set_add(key, member).await
  }

  async fn set_remove(&self, key: &str, member: u64) -> Result<(), BackendError> {
    self.inner.set_remove(key, member).await
  }

  async fn set_members(&self, key: &str) -> Result<Option<Vec<u64>>, BackendError> {
    self.inner.set_members(key).await
  }

  async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Stored<User>>>, BackendError> {
    self.down(&self.fail_multi_get)?;
    self.inner.multi_get(keys).await
  }
}

pub async fn flaky_cache() -> (Arc<FlakyBackend>, Cache<User>) {
  let backend = Arc::new(FlakyBackend::default());
  let cache = CacheBuilder::<User>::new()
    .shared_backend(backend.clone())
    .build()
    .await
    .unwrap();
  (backend, cache)
}
