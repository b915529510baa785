use std::fmt;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// No backend adapter was supplied.
  MissingBackend,
  /// The partition multiplier was zero; the lock table needs at least
  /// one partition.
  ZeroPartitions,
  /// The lock retry budget was zero, which would fail every fallback
  /// set mutation immediately.
  ZeroRetryBudget,
  /// The parallel-fanout threshold was zero.
  ZeroFanout,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::MissingBackend => write!(f, "a backend adapter is required"),
      BuildError::ZeroPartitions => write!(f, "lock partition multiplier cannot be zero"),
      BuildError::ZeroRetryBudget => write!(f, "lock retry budget cannot be zero"),
      BuildError::ZeroFanout => write!(f, "parallel-fanout threshold cannot be zero"),
    }
  }
}

impl std::error::Error for BuildError {}

/// Errors surfaced by a backend adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
  /// The backend could not serve the request (connection lost, store
  /// shut down, …). The engine treats these as advisory: reads fail
  /// open, writes are logged and retried on the next mutation.
  Unavailable(String),
  /// The adapter does not implement this optional operation. Doubles as
  /// the capability-probe signal at startup.
  Unsupported(&'static str),
}

impl fmt::Display for BackendError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BackendError::Unavailable(reason) => write!(f, "backend unavailable: {}", reason),
      BackendError::Unsupported(op) => write!(f, "backend does not support `{}`", op),
    }
  }
}

impl std::error::Error for BackendError {}

/// A set-lock partition could not be acquired within the retry budget.
///
/// Fatal to the operation that needed the mutation; never retried
/// internally past the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeout {
  /// The set key whose partition was contended.
  pub key: String,
  /// How many acquisition attempts were made.
  pub attempts: u32,
}

impl fmt::Display for LockTimeout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "set lock timed out after {} attempts on `{}`",
      self.attempts, self.key
    )
  }
}

impl std::error::Error for LockTimeout {}

/// Internal error of a reverse-index set mutation: either the backend
/// refused, or the fallback lock budget ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SetOpError {
  Backend(BackendError),
  Lock(LockTimeout),
}

impl From<BackendError> for SetOpError {
  fn from(err: BackendError) -> Self {
    SetOpError::Backend(err)
  }
}

impl From<LockTimeout> for SetOpError {
  fn from(timeout: LockTimeout) -> Self {
    SetOpError::Lock(timeout)
  }
}

/// The error type of the callback-driven cache operations.
///
/// `Source` wraps whatever error the caller's own callback produced; the
/// engine passes it through without touching cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
  /// The caller's fetch or mutation callback failed.
  Source(E),
  /// A reverse-index mutation timed out on its lock partition.
  Lock(LockTimeout),
}

impl<E> From<LockTimeout> for Error<E> {
  fn from(timeout: LockTimeout) -> Self {
    Error::Lock(timeout)
  }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Source(e) => write!(f, "{}", e),
      Error::Lock(t) => write!(f, "{}", t),
    }
  }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Error<E> {}
