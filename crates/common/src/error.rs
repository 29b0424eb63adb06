use thiserror::Error;

/// Canonical basalt error taxonomy used across crates.
///
/// Classification guidance:
/// - [`BasaltError::OutOfMemory`]: an allocation or grow would exceed a
///   configured ceiling; always recoverable by the caller (retry smaller or
///   abort the current program)
/// - [`BasaltError::InvalidCapacity`] / [`BasaltError::TypeMismatch`]:
///   caller logic errors surfaced immediately, not retryable
/// - [`BasaltError::UnknownFunction`]: a program references an unregistered
///   operation; fatal to that program, not to the process
/// - [`BasaltError::OptimizerTypecheckFailed`]: a rewritten program failed
///   re-checking; fatal optimizer bug that must never be silently swallowed
/// - [`BasaltError::Execution`]: runtime operation failure after a
///   successful freeze
/// - [`BasaltError::InvalidConfig`]: malformed environment/config values
/// - [`BasaltError::Io`]: raw filesystem IO failures from std APIs
///
/// An optimizer that declines to slice a program is not an error at all;
/// that outcome is reported through the planner's skip-reason type.
#[derive(Debug, Error)]
pub enum BasaltError {
    /// Allocation or grow rejected by a committed/reserved memory ceiling.
    ///
    /// Counters are left exactly where they were; nothing is partially
    /// charged.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Requested capacity is incompatible with element-count limits or the
    /// heap's storage kind.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),

    /// Declared and actual types disagree at freeze or dispatch time.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Program references an operation absent from the registry.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A partitioner-rewritten program failed its mandatory re-check.
    #[error("optimizer typecheck failed: {0}")]
    OptimizerTypecheckFailed(String),

    /// Invalid or inconsistent configuration/environment state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Runtime operation failure after planning/freezing succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard basalt result alias.
pub type Result<T> = std::result::Result<T, BasaltError>;
