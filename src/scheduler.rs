//! Scheduler-context traits.
//!
//! The queue core never owns an executor or a timer; callers hand in a
//! *scheduler context* and the core reads it strictly through these traits.
//! Plain `push`/`pop` futures need no context at all (the polling task's
//! waker does the work); a context is required only to spawn detached
//! (callback-style) operations and to drive the deadline variants.
use core::{future::Future, time::Duration};

/// A value that can run futures to completion somewhere.
pub trait SchedulerContext: Clone + Send + Sync + 'static {
    /// Spawns `future` onto the context's executor. The future owns
    /// everything it needs; the caller does not wait for it.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// A [`SchedulerContext`] that can also tell time and sleep.
///
/// Required by [`push_until`](crate::Queue::push_until) /
/// [`pop_until`](crate::Queue::pop_until) and the channel deadline
/// operations.
pub trait TimedSchedulerContext: SchedulerContext {
    /// The context's notion of a point in time.
    type Instant: Copy + Send + Sync + 'static;
    /// A future that resolves once a deadline has passed.
    type Sleep: Future<Output = ()> + Send;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Resolves at `deadline` (immediately if it already passed).
    fn sleep_until(&self, deadline: Self::Instant) -> Self::Sleep;

    /// Resolves after `duration` from now.
    fn sleep_after(&self, duration: Duration) -> Self::Sleep;
}
