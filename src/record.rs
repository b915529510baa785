use std::fmt;

/// Prefix under which all reverse-index sets live. Caller cache keys must
/// never start with this string; the namespace is reserved.
pub const SET_PREFIX: &str = "__set:";

/// A scalar primary-key component.
///
/// Composite primary keys are ordered tuples of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
  Int(i64),
  Str(String),
  Bool(bool),
}

impl fmt::Display for Scalar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Scalar::Int(v) => write!(f, "{}", v),
      Scalar::Str(v) => write!(f, "{}", v),
      Scalar::Bool(v) => write!(f, "{}", v),
    }
  }
}

impl From<i64> for Scalar {
  fn from(v: i64) -> Self {
    Scalar::Int(v)
  }
}

impl From<&str> for Scalar {
  fn from(v: &str) -> Self {
    Scalar::Str(v.to_string())
  }
}

impl From<String> for Scalar {
  fn from(v: String) -> Self {
    Scalar::Str(v)
  }
}

impl From<bool> for Scalar {
  fn from(v: bool) -> Self {
    Scalar::Bool(v)
  }
}

/// A domain record that the cache can index.
///
/// Implementations expose a stable type tag and the ordered list of
/// primary-key fields (name and scalar value). Two records name the same
/// identity iff their type tags and primary-key values match element-wise.
pub trait Record: Clone + Send + Sync + 'static {
  /// A stable identifier for this record's kind, e.g. `"User"`.
  fn type_tag(&self) -> &str;

  /// The ordered primary-key fields of this record.
  fn primary_key(&self) -> Vec<(&'static str, Scalar)>;
}

/// The owned identity of a record: `(type tag, primary-key tuple)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
  type_tag: String,
  pk: Vec<(&'static str, Scalar)>,
}

impl Identity {
  /// Projects a record onto its identity.
  pub fn of<R: Record>(record: &R) -> Self {
    Self {
      type_tag: record.type_tag().to_string(),
      pk: record.primary_key(),
    }
  }

  pub fn type_tag(&self) -> &str {
    &self.type_tag
  }

  /// The backend key of the instance index set for this identity:
  /// `__set:<type>:<pk>[:<pk>…]`.
  pub fn instance_set_key(&self) -> String {
    let mut key = format!("{}{}", SET_PREFIX, self.type_tag);
    for (_, value) in &self.pk {
      key.push(':');
      key.push_str(&value.to_string());
    }
    key
  }

  /// The backend key of the type index set for `type_tag`: `__set:<type>`.
  pub fn type_set_key(type_tag: &str) -> String {
    format!("{}{}", SET_PREFIX, type_tag)
  }
}

impl fmt::Display for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}[", self.type_tag)?;
    for (i, (name, value)) in self.pk.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}={}", name, value)?;
    }
    write!(f, "]")
  }
}

/// A cacheable value: a singular record or a collection of records.
///
/// Fetch callbacks that produce anything else simply pass through the
/// engine uncached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<R> {
  One(R),
  Many(Vec<R>),
}

impl<R> Payload<R> {
  /// Returns the singular record, if this is a `One`.
  pub fn one(&self) -> Option<&R> {
    match self {
      Payload::One(r) => Some(r),
      Payload::Many(_) => None,
    }
  }

  /// Returns the collection, if this is a `Many`.
  pub fn many(&self) -> Option<&[R]> {
    match self {
      Payload::One(_) => None,
      Payload::Many(l) => Some(l),
    }
  }

  pub fn len(&self) -> usize {
    match self {
      Payload::One(_) => 1,
      Payload::Many(l) => l.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
