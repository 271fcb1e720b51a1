//! # Shovel Common
//!
//! Error types, logging configuration, and retry utilities shared by
//! every crate in the Shovel ServiceWorker execution runtime.

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, CategoryLogger, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, RetryConfig};

/// Unified error type for the Shovel runtime.
///
/// Each variant corresponds to one of the error kinds named by the
/// runtime's error handling design: lifecycle/event-phase violations,
/// worker supervision failures, and configuration problems all surface
/// as a `ShovelError`, carried across the supervisor/worker boundary
/// and back up to the HTTP listener as a well-formed message.
#[derive(Error, Debug)]
pub enum ShovelError {
    /// `waitUntil`/`respondWith` called when the event does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A fetch event's response slot was already set.
    #[error("already responded")]
    AlreadyResponded,

    /// Fetch dispatch completed synchronously without a `respondWith`.
    #[error("no response")]
    NoResponse,

    /// Install or activate exceeded its pending-future deadline.
    #[error("lifecycle timeout after {0:?}")]
    LifecycleTimeout(Duration),

    /// Self-fetch recursion exceeded the hard cap.
    #[error("self-fetch recursion exceeded depth {0}")]
    RecursionExceeded(u32),

    /// A config entry named an unknown module, export, or backend.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// An in-flight request's worker disappeared before responding.
    #[error("worker lost: {0}")]
    WorkerLost(String),

    /// The supervisor's in-flight queue exceeded its high-water mark.
    #[error("overloaded")]
    Overloaded,

    /// A database `upgradeneeded` future rejected.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// I/O errors from the host environment.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic operation timeout (distinct from `LifecycleTimeout`).
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A named resource (registry entry, config section, …) was absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller passed a malformed argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Anything else; carries a backtrace since these are unexpected.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl ShovelError {
    /// Create an internal error, capturing a backtrace at the call site.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether retrying the operation that produced this error might help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShovelError::Io(_) | ShovelError::Timeout(_) | ShovelError::WorkerLost(_)
        )
    }

    /// Stable category string for log fields and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            ShovelError::InvalidState(_) => "invalid_state",
            ShovelError::AlreadyResponded => "already_responded",
            ShovelError::NoResponse => "no_response",
            ShovelError::LifecycleTimeout(_) => "lifecycle_timeout",
            ShovelError::RecursionExceeded(_) => "recursion_exceeded",
            ShovelError::ConfigInvalid(_) => "config_invalid",
            ShovelError::WorkerLost(_) => "worker_lost",
            ShovelError::Overloaded => "overloaded",
            ShovelError::MigrationFailed(_) => "migration_failed",
            ShovelError::Io(_) => "io",
            ShovelError::Timeout(_) => "timeout",
            ShovelError::Cancelled => "cancelled",
            ShovelError::NotFound(_) => "not_found",
            ShovelError::InvalidArgument(_) => "invalid_argument",
            ShovelError::Internal { .. } => "internal",
        }
    }

    /// Per the error handling design: listener exceptions and missing
    /// responses fail the *request*, not the worker that served it.
    pub fn is_request_fatal(&self) -> bool {
        matches!(
            self,
            ShovelError::NoResponse
                | ShovelError::AlreadyResponded
                | ShovelError::InvalidState(_)
                | ShovelError::RecursionExceeded(_)
        )
    }
}

/// Result type alias for Shovel operations.
pub type Result<T> = std::result::Result<T, ShovelError>;

/// Extension trait for converting a foreign `Option` into `ShovelError::NotFound`.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ShovelError::NotFound(resource.into()))
    }
}
