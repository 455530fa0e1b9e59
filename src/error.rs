//! Error kinds shared by every fallible operation in this crate.
//!
//! The taxonomy is deliberately flat: a single [`ErrorKind`] enum covers the
//! transient fast-path misses (`QueueFull`/`QueueEmpty`), the terminal
//! outcomes of asynchronous operations (`Canceled`/`Timeout`/`ChannelClosed`),
//! and the contract errors that only appear when an API is misused.
//! Operations that would otherwise lose the value they were handed return
//! [`TryPushError`] instead, which carries the value back to the caller.
use core::fmt;

/// The result carrier used across the crate.
pub type Outcome<T> = Result<T, ErrorKind>;

/// Enumerated failure codes.
///
/// `QueueFull` and `QueueEmpty` are *transient*: they are only ever returned
/// by the synchronous `try_` surface, and the async operations use them
/// internally as the signal to park. `Canceled`, `Timeout`, and
/// `ChannelClosed` are *terminal* async outcomes. The remaining kinds are
/// contract errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The operation was canceled through a [`StopToken`](crate::StopToken).
    #[error("canceled")]
    Canceled,
    /// A deadline elapsed before the operation could complete.
    #[error("timeout")]
    Timeout,
    /// The scheduler layer failed to drive the operation.
    #[error("unavailable")]
    Unavailable,
    /// The queue was observed empty.
    #[error("queue empty")]
    QueueEmpty,
    /// The queue was observed full and cannot grow (or growth failed).
    #[error("queue full")]
    QueueFull,
    /// The channel was closed.
    #[error("channel closed")]
    ChannelClosed,
    /// A construction parameter was out of range.
    #[error("invalid argument")]
    InvalidArgument,
    /// An allocation or auxiliary resource limit was exhausted.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// A pre- or post-condition was broken.
    #[error("contract violation")]
    ContractViolation,
    /// A state that should be unreachable was reached.
    #[error("internal error")]
    InternalError,
}

impl ErrorKind {
    /// Returns `true` for the fast-path misses that drive parking rather
    /// than surfacing to async callers.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::QueueFull | Self::QueueEmpty)
    }

    /// Returns `true` for the outcomes an async operation can terminate
    /// with (besides success).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Timeout | Self::ChannelClosed | Self::Unavailable
        )
    }
}

/// Error returned by [`Bounded::try_push`], [`Dynamic::try_push`], and
/// [`Channel::try_push`] when the value could not be enqueued. The rejected
/// value rides along so the caller can retry or drop it deliberately.
///
/// [`Bounded::try_push`]: crate::Bounded::try_push
/// [`Dynamic::try_push`]: crate::Dynamic::try_push
/// [`Channel::try_push`]: crate::Channel::try_push
#[non_exhaustive]
#[derive(PartialEq, Eq)]
pub enum TryPushError<T = ()> {
    /// The queue was observed full (and, for a growable queue, could not be
    /// expanded any further).
    Full(T),
    /// The channel has been closed; no further values will be accepted.
    Closed(T),
}

// === impl TryPushError ===

impl<T> TryPushError<T> {
    /// Returns `true` if the push failed because the queue was at capacity.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns `true` if the push failed because the channel was closed.
    ///
    /// If this returns `true`, no future push on this channel will succeed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// The [`ErrorKind`] equivalent of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Full(_) => ErrorKind::QueueFull,
            Self::Closed(_) => ErrorKind::ChannelClosed,
        }
    }

    /// Unwraps the rejected value.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(val) => val,
            Self::Closed(val) => val,
        }
    }
}

impl<T> fmt::Debug for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full(_) => "TryPushError::Full(..)",
            Self::Closed(_) => "TryPushError::Closed(..)",
        })
    }
}

impl<T> fmt::Display for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full(_) => "no available capacity",
            Self::Closed(_) => "channel closed",
        })
    }
}

impl<T> std::error::Error for TryPushError<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert!(ErrorKind::QueueFull.is_transient());
        assert!(ErrorKind::QueueEmpty.is_transient());
        assert!(!ErrorKind::ChannelClosed.is_transient());

        assert!(ErrorKind::Canceled.is_terminal());
        assert!(ErrorKind::Timeout.is_terminal());
        assert!(ErrorKind::ChannelClosed.is_terminal());
        assert!(!ErrorKind::QueueFull.is_terminal());
    }

    #[test]
    fn try_push_error_round_trips_value() {
        let err = TryPushError::Full(41);
        assert!(err.is_full());
        assert_eq!(err.kind(), ErrorKind::QueueFull);
        assert_eq!(err.into_inner(), 41);

        let err = TryPushError::Closed("hello");
        assert!(err.is_closed());
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        assert_eq!(err.into_inner(), "hello");
    }

    #[test]
    fn display_matches_kind() {
        assert_eq!(ErrorKind::QueueEmpty.to_string(), "queue empty");
        assert_eq!(TryPushError::Full(()).to_string(), "no available capacity");
        assert_eq!(TryPushError::Closed(()).to_string(), "channel closed");
    }
}
