use std::collections::BTreeMap;

/// Caller-supplied query parameters, keyed by field name.
///
/// A `BTreeMap` keeps the keys sorted, so two logically equal parameter
/// maps always derive the same cache key regardless of how the caller
/// assembled them.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Derives the backend cache key for a `(key, params)` pair.
///
/// Implementations must be pure and deterministic for logically equal
/// `params`.
pub trait KeySerializer: Send + Sync + 'static {
  fn derive(&self, key: &str, params: &Params) -> String;
}

/// The canonical serializer: sorts map keys (by construction of `Params`)
/// and emits `"{key}:{json}"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonKeySerializer;

impl KeySerializer for JsonKeySerializer {
  fn derive(&self, key: &str, params: &Params) -> String {
    // A map of JSON values always serializes.
    let json = serde_json::to_string(params).expect("params serialize to JSON");
    format!("{}:{}", key, json)
  }
}
