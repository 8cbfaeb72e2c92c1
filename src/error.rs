// src/error.rs
//! Error kinds, failure values and the pluggable error sink.
//!
//! Pool failures are *reported, not thrown*: every fallible operation
//! invokes the configured [`ErrorSink`] exactly once and then returns an
//! `Err` carrying the matching [`PoolError`]. Nothing is retried
//! internally.

use std::fmt;

/// Classification of a pool failure, as delivered to the [`ErrorSink`].
///
/// The set is closed; sinks can match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The pool handle itself is unusable.
    ///
    /// Kept for sink-interface completeness; no operation on a live
    /// `&Pool` produces it.
    InvalidPool,
    /// A returned pointer is not a currently-leased object of this pool,
    /// or a slot failed its validation hook.
    InvalidObject,
    /// No free slot in any shard and no parking callback was supplied.
    Exhausted,
    /// The underlying allocator refused a request.
    AllocFailed,
    /// A size or count argument is outside its documented bounds.
    InvalidSize,
    /// Shrink could not find enough contiguous free slots at the high
    /// end of a shard.
    InsufficientFree,
    /// The backpressure queue is full and could not be expanded.
    QueueFull,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidPool => "invalid pool",
            Self::InvalidObject => "invalid object",
            Self::Exhausted => "exhausted",
            Self::AllocFailed => "allocation failed",
            Self::InvalidSize => "invalid size",
            Self::InsufficientFree => "insufficient free slots",
            Self::QueueFull => "queue full",
        };
        f.write_str(name)
    }
}

/// Errors returned by pool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool handle itself is unusable.
    InvalidPool,
    /// A pointer was rejected on return or a slot failed validation.
    InvalidObject(String),
    /// Every shard is fully leased and the caller did not park.
    Exhausted,
    /// The allocator returned null or a reservation failed.
    AllocFailed(String),
    /// An argument was outside its documented bounds.
    InvalidSize(String),
    /// Shrink found fewer contiguous free tail slots than requested.
    InsufficientFree {
        /// Slots the shard was asked to give up.
        requested: usize,
        /// Contiguous free slots actually available at the high end.
        free_tail: usize,
    },
    /// The backpressure queue is full and expansion failed.
    QueueFull,
}

impl PoolError {
    /// The [`ErrorKind`] this error is reported under.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPool => ErrorKind::InvalidPool,
            Self::InvalidObject(_) => ErrorKind::InvalidObject,
            Self::Exhausted => ErrorKind::Exhausted,
            Self::AllocFailed(_) => ErrorKind::AllocFailed,
            Self::InvalidSize(_) => ErrorKind::InvalidSize,
            Self::InsufficientFree { .. } => ErrorKind::InsufficientFree,
            Self::QueueFull => ErrorKind::QueueFull,
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPool => write!(f, "Pool handle is unusable"),
            Self::InvalidObject(msg) => write!(f, "Invalid object: {}", msg),
            Self::Exhausted => write!(f, "Pool exhausted"),
            Self::AllocFailed(msg) => write!(f, "Allocation failed: {}", msg),
            Self::InvalidSize(msg) => write!(f, "Invalid size: {}", msg),
            Self::InsufficientFree {
                requested,
                free_tail,
            } => write!(
                f,
                "Insufficient free slots: requested {}, free tail {}",
                requested, free_tail
            ),
            Self::QueueFull => write!(f, "Backpressure queue full"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Convert PoolError to anyhow::Error (for embedding-host compatibility)
#[cfg(feature = "anyhow")]
impl From<PoolError> for anyhow::Error {
    fn from(err: PoolError) -> Self {
        anyhow::anyhow!("{}", err)
    }
}

/// Allow using ? with anyhow::Error
#[cfg(feature = "anyhow")]
impl From<anyhow::Error> for PoolError {
    fn from(err: anyhow::Error) -> Self {
        PoolError::InvalidObject(err.to_string())
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

// ============================================================================
// ERROR SINK
// ============================================================================

/// Destination for failure reports.
///
/// The pool calls [`report`](Self::report) exactly once per distinct
/// failure, before the failing operation returns. Some call sites run
/// while a shard lock is held, so implementations must be quick and
/// **must not call back into the pool**.
pub trait ErrorSink: Send + Sync {
    /// Receives one failure report.
    fn report(&self, kind: ErrorKind, message: &str);
}

/// Default sink: writes each report to standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl ErrorSink for StderrSink {
    fn report(&self, kind: ErrorKind, message: &str) {
        eprintln!("shardpool: {}: {}", kind, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = PoolError::InsufficientFree {
            requested: 4,
            free_tail: 1,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFree);
        assert_eq!(PoolError::Exhausted.kind(), ErrorKind::Exhausted);
        assert_eq!(PoolError::QueueFull.kind(), ErrorKind::QueueFull);
    }

    #[test]
    fn test_display_carries_detail() {
        let err = PoolError::InvalidSize("shard_count 0 out of range".into());
        assert!(err.to_string().contains("shard_count 0"));
    }

    #[cfg(feature = "anyhow")]
    #[test]
    fn test_anyhow_conversion() {
        let err = PoolError::Exhausted;
        let anyhow_err: anyhow::Error = err.into();
        assert!(anyhow_err.to_string().contains("exhausted"));
    }
}
