//! Cooperative cancellation for the async operations.
//!
//! A [`StopSource`] owns the stop state; any number of [`StopToken`]s can be
//! handed to operations. Requesting a stop flips one flag and wakes every
//! task that registered interest, and each operation then completes with
//! [`ErrorKind::Canceled`](crate::ErrorKind::Canceled) on its next drive
//! pass. Nothing is interrupted mid-operation: a push that already claimed
//! its slot finishes publishing it.
use core::task::Waker;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[derive(Debug, Default)]
struct Shared {
    stopped: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// The requesting side of a stop channel.
#[derive(Debug, Default)]
pub struct StopSource {
    shared: Arc<Shared>,
}

/// A cancellation signal observed by async operations.
///
/// The default token can never be stopped, so APIs that take a `StopToken`
/// cost nothing when cancellation isn't needed.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    shared: Option<Arc<Shared>>,
}

// === impl StopSource ===

impl StopSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> StopToken {
        StopToken {
            shared: Some(self.shared.clone()),
        }
    }

    /// Requests a stop, waking every registered waiter. Returns `true` the
    /// first time, `false` if a stop was already requested.
    pub fn request_stop(&self) -> bool {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        let wakers = std::mem::take(&mut *self.shared.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// `true` once [`request_stop`](Self::request_stop) has been called.
    pub fn stop_requested(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }
}

// === impl StopToken ===

impl StopToken {
    /// A token that can never be stopped.
    pub fn never() -> Self {
        Self::default()
    }

    /// `true` once the owning [`StopSource`] requested a stop. Always
    /// `false` for [`never`](Self::never) tokens.
    pub fn stop_requested(&self) -> bool {
        match &self.shared {
            Some(shared) => shared.stopped.load(Ordering::Acquire),
            None => false,
        }
    }

    /// `true` if a stop can ever be requested through this token.
    pub fn can_stop(&self) -> bool {
        self.shared.is_some()
    }

    /// Registers `waker` to be woken when a stop is requested. A task that
    /// re-registers replaces its previous waker rather than piling up
    /// entries. If the stop already happened, wakes immediately.
    pub(crate) fn register(&self, waker: &Waker) {
        let shared = match &self.shared {
            Some(shared) => shared,
            None => return,
        };

        {
            let mut wakers = shared.wakers.lock();
            if let Some(existing) = wakers.iter_mut().find(|w| w.will_wake(waker)) {
                *existing = waker.clone();
            } else {
                wakers.push(waker.clone());
            }
        }

        // A stop may have slipped in between the flag check in the caller
        // and the registration above; don't leave the task parked.
        if shared.stopped.load(Ordering::Acquire) {
            waker.wake_by_ref();
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn stop_is_one_shot() {
        let source = StopSource::new();
        let token = source.token();

        assert!(!token.stop_requested());
        assert!(source.request_stop());
        assert!(!source.request_stop());
        assert!(token.stop_requested());
        assert!(source.stop_requested());
    }

    #[test]
    fn never_token_never_stops() {
        let token = StopToken::never();
        assert!(!token.can_stop());
        assert!(!token.stop_requested());
    }

    #[test]
    fn tokens_share_one_source() {
        let source = StopSource::new();
        let one = source.token();
        let two = one.clone();
        source.request_stop();
        assert!(one.stop_requested());
        assert!(two.stop_requested());
    }
}
