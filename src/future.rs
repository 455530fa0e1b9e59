//! Async operations over the rings.
//!
//! Each operation is a lazy future built around one drive loop: spin on the
//! lock-free fast path a bounded number of times, and if the queue still
//! isn't ready, compute the exact slot turn being waited for and park in the
//! ring's wait-channel registry.
//! The registry's wakeup callback flips the operation's `waiting` flag and
//! wakes the task; the next poll re-runs the drive loop. A poll that arrives
//! without a wakeup (executor artifacts, a moved task, a second `select!`
//! branch) simply disarms and re-parks with the fresh waker.
//!
//! `QueueFull`/`QueueEmpty` never escape from here; they are exactly the
//! signal to park. Terminal outcomes are success, [`ErrorKind::Canceled`],
//! [`ErrorKind::Timeout`] (deadline variants), and
//! [`ErrorKind::ChannelClosed`] (channel compositions).
use crate::{
    bounded::Bounded,
    dynamic::Dynamic,
    error::{ErrorKind, Outcome, TryPushError},
    loom::{
        atomic::{AtomicBool, Ordering::*},
        UnsafeCell,
    },
    notify::{WaitRegistration, Waiter},
    scheduler::{SchedulerContext, TimedSchedulerContext},
    stop::StopToken,
    util::spin_pause,
};
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use pin_project::{pin_project, pinned_drop};
use std::sync::Arc;

/// Fast-path attempts before an operation parks.
const ASYNC_SPIN_LIMIT: u32 = 64;

pub(crate) mod sealed {
    use super::*;

    /// The low-level surface the futures drive. Implemented by both ring
    /// flavors; not implementable outside this crate.
    pub trait RawQueue<T> {
        fn try_push_value(&self, value: T) -> Result<(), TryPushError<T>>;
        fn try_pop_value(&self) -> Outcome<T>;
        fn push_registration(&self) -> WaitRegistration;
        fn pop_registration(&self) -> WaitRegistration;
        /// # Safety
        ///
        /// See [`Notify::arm`](crate::notify::Notify::arm): the waiter must
        /// stay pinned and alive until disarmed or woken.
        unsafe fn arm_push_waiter(&self, waiter: Pin<&Waiter>) -> bool;
        unsafe fn disarm_push_waiter(&self, waiter: Pin<&Waiter>);
        unsafe fn arm_pop_waiter(&self, waiter: Pin<&Waiter>) -> bool;
        unsafe fn disarm_pop_waiter(&self, waiter: Pin<&Waiter>);
    }
}

use sealed::RawQueue;

macro_rules! impl_raw_queue {
    ($queue:ident) => {
        impl<T> RawQueue<T> for $queue<T> {
            fn try_push_value(&self, value: T) -> Result<(), TryPushError<T>> {
                self.try_push(value)
            }

            fn try_pop_value(&self) -> Outcome<T> {
                self.try_pop()
            }

            fn push_registration(&self) -> WaitRegistration {
                self.push_registration()
            }

            fn pop_registration(&self) -> WaitRegistration {
                self.pop_registration()
            }

            unsafe fn arm_push_waiter(&self, waiter: Pin<&Waiter>) -> bool {
                self.arm_push_waiter(waiter)
            }

            unsafe fn disarm_push_waiter(&self, waiter: Pin<&Waiter>) {
                self.disarm_push_waiter(waiter)
            }

            unsafe fn arm_pop_waiter(&self, waiter: Pin<&Waiter>) -> bool {
                self.arm_pop_waiter(waiter)
            }

            unsafe fn disarm_pop_waiter(&self, waiter: Pin<&Waiter>) {
                self.disarm_pop_waiter(waiter)
            }
        }
    };
}

impl_raw_queue!(Bounded);
impl_raw_queue!(Dynamic);

/// Asynchronous operations shared by [`Bounded`] and [`Dynamic`].
pub trait Queue<T>: RawQueue<T> {
    /// Enqueues `value`, waiting for capacity if the queue is full.
    ///
    /// The returned future is lazy; it does nothing until polled.
    fn push(&self, value: T) -> Push<'_, T, Self>
    where
        Self: Sized,
    {
        Push::new(self, value)
    }

    /// Dequeues a value, waiting for one if the queue is empty.
    fn pop(&self) -> Pop<'_, T, Self>
    where
        Self: Sized,
    {
        Pop::new(self)
    }

    /// Like [`push`](Self::push), but completes with
    /// [`ErrorKind::Timeout`] if `deadline` passes first. A timed-out push
    /// is guaranteed not to have enqueued the value.
    fn push_until<C>(
        &self,
        context: &C,
        deadline: C::Instant,
        value: T,
    ) -> PushUntil<'_, T, Self, C::Sleep>
    where
        C: TimedSchedulerContext,
        Self: Sized,
    {
        Deadline::new(self.push(value), context.sleep_until(deadline))
    }

    /// Like [`pop`](Self::pop), but completes with [`ErrorKind::Timeout`]
    /// if `deadline` passes first. A timed-out pop has consumed nothing.
    fn pop_until<C>(&self, context: &C, deadline: C::Instant) -> PopUntil<'_, T, Self, C::Sleep>
    where
        C: TimedSchedulerContext,
        Self: Sized,
    {
        Deadline::new(self.pop(), context.sleep_until(deadline))
    }
}

impl<T> Queue<T> for Bounded<T> {}
impl<T> Queue<T> for Dynamic<T> {}

/// The waker handoff between a parked operation and the notifying thread.
///
/// The owner stores its waker, raises `waiting`, and arms; the wakeup
/// callback takes `waiting` back with a CAS and only then reads the waker.
/// Whoever wins the CAS owns the transition, so a wake is consumed exactly
/// once even when cancellation and notification race.
pub(crate) struct WakeCell {
    waiting: AtomicBool,
    waker: UnsafeCell<Option<Waker>>,
}

impl WakeCell {
    pub(crate) fn new() -> Self {
        Self {
            waiting: AtomicBool::new(false),
            waker: UnsafeCell::new(None),
        }
    }

    /// Stores the task's waker. Must only be called while not armed (the
    /// owner has exclusive access to the cell).
    pub(crate) fn set_waker(&self, waker: &Waker) {
        self.waker.with_mut(|slot| {
            let slot = unsafe { &mut *slot };
            match slot {
                Some(existing) if existing.will_wake(waker) => {}
                _ => *slot = Some(waker.clone()),
            }
        });
    }

    pub(crate) fn begin_wait(&self) {
        self.waiting.store(true, Release);
    }

    /// Takes the waiting flag back; `true` if this call revoked an armed
    /// wait (and the wakeup callback therefore will not).
    pub(crate) fn cancel_wait(&self) -> bool {
        self.waiting.swap(false, AcqRel)
    }

    /// Wait-channel callback: consume the waiting flag and wake the task.
    pub(crate) unsafe fn wake(owner: *const (), _waiter: *const Waiter) {
        let cell = unsafe { &*(owner as *const WakeCell) };
        if cell
            .waiting
            .compare_exchange(true, false, AcqRel, Acquire)
            .is_ok()
        {
            let waker = cell.waker.with_mut(|slot| unsafe { (*slot).take() });
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    pub(crate) fn owner_ptr(&self) -> *const () {
        self as *const WakeCell as *const ()
    }
}

// The cell is handed to the notifier by raw pointer; the CAS handoff above
// serializes access to the waker slot.
unsafe impl Send for WakeCell {}
unsafe impl Sync for WakeCell {}

/// Future returned by [`Queue::push`].
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Push<'q, T, Q: Queue<T>> {
    queue: &'q Q,
    value: Option<T>,
    stop: StopToken,
    wake: WakeCell,
    #[pin]
    waiter: Waiter,
}

impl<'q, T, Q: Queue<T>> Push<'q, T, Q> {
    pub(crate) fn new(queue: &'q Q, value: T) -> Self {
        Self {
            queue,
            value: Some(value),
            stop: StopToken::never(),
            wake: WakeCell::new(),
            waiter: Waiter::new(),
        }
    }

    /// Attaches a cancellation token; when it fires, the future completes
    /// with [`ErrorKind::Canceled`] on its next pass instead of waiting
    /// further. Must be called before the first poll.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }
}

impl<'q, T, Q: Queue<T>> Future for Push<'q, T, Q> {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if this.stop.stop_requested() {
            if this.wake.cancel_wait() {
                unsafe { this.queue.disarm_push_waiter(this.waiter.as_ref()) };
            }
            return Poll::Ready(Err(ErrorKind::Canceled));
        }
        this.stop.register(cx.waker());

        // A poll that arrives while still armed didn't come from our wakeup
        // (or the waker may have changed); drop the registration and
        // re-drive from scratch.
        if this.wake.cancel_wait() {
            unsafe { this.queue.disarm_push_waiter(this.waiter.as_ref()) };
        }

        loop {
            for _ in 0..ASYNC_SPIN_LIMIT {
                match this.queue.try_push_value(take_value(this.value)) {
                    Ok(()) => return Poll::Ready(Ok(())),
                    Err(TryPushError::Closed(value)) => {
                        *this.value = Some(value);
                        return Poll::Ready(Err(ErrorKind::ChannelClosed));
                    }
                    Err(TryPushError::Full(value)) => {
                        *this.value = Some(value);
                        spin_pause();
                    }
                }
            }
            match this.queue.try_push_value(take_value(this.value)) {
                Ok(()) => return Poll::Ready(Ok(())),
                Err(TryPushError::Closed(value)) => {
                    *this.value = Some(value);
                    return Poll::Ready(Err(ErrorKind::ChannelClosed));
                }
                Err(TryPushError::Full(value)) => *this.value = Some(value),
            }

            // Park on the exact turn the current push ticket is waiting for.
            this.wake.set_waker(cx.waker());
            let registration = this.queue.push_registration();
            this.waiter
                .as_mut()
                .prepare(registration, this.wake.owner_ptr(), WakeCell::wake);
            this.wake.begin_wait();

            if unsafe { this.queue.arm_push_waiter(this.waiter.as_ref()) } {
                test_println!("Push::poll -> parked");
                return Poll::Pending;
            }
            // The turn advanced while arming; try again right away.
            this.wake.cancel_wait();
        }
    }
}

#[pinned_drop]
impl<'q, T, Q: Queue<T>> PinnedDrop for Push<'q, T, Q> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.wake.cancel_wait();
        // Also synchronizes with any in-flight wakeup, so the waiter memory
        // is quiescent before it is released.
        unsafe { this.queue.disarm_push_waiter(this.waiter.as_ref()) };
    }
}

/// Future returned by [`Queue::pop`].
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Pop<'q, T, Q: Queue<T>> {
    queue: &'q Q,
    stop: StopToken,
    wake: WakeCell,
    #[pin]
    waiter: Waiter,
    _value: core::marker::PhantomData<fn() -> T>,
}

impl<'q, T, Q: Queue<T>> Pop<'q, T, Q> {
    pub(crate) fn new(queue: &'q Q) -> Self {
        Self {
            queue,
            stop: StopToken::never(),
            wake: WakeCell::new(),
            waiter: Waiter::new(),
            _value: core::marker::PhantomData,
        }
    }

    /// Attaches a cancellation token. Must be called before the first poll.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }
}

impl<'q, T, Q: Queue<T>> Future for Pop<'q, T, Q> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if this.stop.stop_requested() {
            if this.wake.cancel_wait() {
                unsafe { this.queue.disarm_pop_waiter(this.waiter.as_ref()) };
            }
            return Poll::Ready(Err(ErrorKind::Canceled));
        }
        this.stop.register(cx.waker());

        if this.wake.cancel_wait() {
            unsafe { this.queue.disarm_pop_waiter(this.waiter.as_ref()) };
        }

        loop {
            for _ in 0..ASYNC_SPIN_LIMIT {
                match this.queue.try_pop_value() {
                    Ok(value) => return Poll::Ready(Ok(value)),
                    Err(ErrorKind::QueueEmpty) => spin_pause(),
                    Err(terminal) => return Poll::Ready(Err(terminal)),
                }
            }
            match this.queue.try_pop_value() {
                Ok(value) => return Poll::Ready(Ok(value)),
                Err(ErrorKind::QueueEmpty) => {}
                Err(terminal) => return Poll::Ready(Err(terminal)),
            }

            this.wake.set_waker(cx.waker());
            let registration = this.queue.pop_registration();
            this.waiter
                .as_mut()
                .prepare(registration, this.wake.owner_ptr(), WakeCell::wake);
            this.wake.begin_wait();

            if unsafe { this.queue.arm_pop_waiter(this.waiter.as_ref()) } {
                test_println!("Pop::poll -> parked");
                return Poll::Pending;
            }
            this.wake.cancel_wait();
        }
    }
}

#[pinned_drop]
impl<'q, T, Q: Queue<T>> PinnedDrop for Pop<'q, T, Q> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.wake.cancel_wait();
        unsafe { this.queue.disarm_pop_waiter(this.waiter.as_ref()) };
    }
}

/// When-any of an operation and a deadline: whichever completes first wins,
/// and the loser is dropped (disarming any parked waiter).
///
/// Returned by [`Queue::push_until`] and [`Queue::pop_until`] (see the
/// [`PushUntil`]/[`PopUntil`] aliases), and by the channel deadline
/// operations.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Deadline<F, S> {
    #[pin]
    operation: F,
    #[pin]
    sleep: S,
    stop: StopToken,
}

/// Future returned by [`Queue::push_until`].
pub type PushUntil<'q, T, Q, S> = Deadline<Push<'q, T, Q>, S>;
/// Future returned by [`Queue::pop_until`].
pub type PopUntil<'q, T, Q, S> = Deadline<Pop<'q, T, Q>, S>;

impl<F, S> Deadline<F, S> {
    pub(crate) fn new(operation: F, sleep: S) -> Self {
        Self {
            operation,
            sleep,
            stop: StopToken::never(),
        }
    }

    /// Attaches a cancellation token. Must be called before the first poll.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }
}

impl<U, F, S> Future for Deadline<F, S>
where
    F: Future<Output = Outcome<U>>,
    S: Future<Output = ()>,
{
    type Output = Outcome<U>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.stop.stop_requested() {
            return Poll::Ready(Err(ErrorKind::Canceled));
        }
        this.stop.register(cx.waker());

        // The operation gets the first look, so a ready queue beats an
        // expired timer and a timed-out push provably enqueued nothing.
        if let Poll::Ready(output) = this.operation.poll(cx) {
            return Poll::Ready(output);
        }
        match this.sleep.poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(ErrorKind::Timeout)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Callback-shaped push: spawns the operation on `context` and calls
/// `handler` with the outcome exactly once.
///
/// A stop already requested completes `Canceled` inline without spawning; a
/// stop that lands after the push succeeded still reports `Canceled`, like
/// the other cancellation paths.
pub fn push_detached<T, Q, C, F>(
    queue: &Arc<Q>,
    context: &C,
    value: T,
    handler: F,
    stop: StopToken,
) where
    T: Send + 'static,
    Q: Queue<T> + Send + Sync + 'static,
    C: SchedulerContext,
    F: FnOnce(Outcome<()>) + Send + 'static,
{
    if stop.stop_requested() {
        handler(Err(ErrorKind::Canceled));
        return;
    }

    let queue = Arc::clone(queue);
    context.spawn(async move {
        let mut status = queue.push(value).with_stop_token(stop.clone()).await;
        if stop.stop_requested() && status.is_ok() {
            status = Err(ErrorKind::Canceled);
        }
        handler(status);
    });
}

/// Callback-shaped pop; see [`push_detached`].
pub fn pop_detached<T, Q, C, F>(queue: &Arc<Q>, context: &C, handler: F, stop: StopToken)
where
    T: Send + 'static,
    Q: Queue<T> + Send + Sync + 'static,
    C: SchedulerContext,
    F: FnOnce(Outcome<T>) + Send + 'static,
{
    if stop.stop_requested() {
        handler(Err(ErrorKind::Canceled));
        return;
    }

    let queue = Arc::clone(queue);
    context.spawn(async move {
        let mut status = queue.pop().with_stop_token(stop.clone()).await;
        if stop.stop_requested() && status.is_ok() {
            status = Err(ErrorKind::Canceled);
        }
        handler(status);
    });
}

#[inline]
fn take_value<T>(value: &mut Option<T>) -> T {
    value
        .take()
        .expect("operation polled after completing; this is a bug in the caller")
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn futures_are_send() {
        let queue = Bounded::<usize>::new(4);
        let push = queue.push(1);
        assert_send(&push);
        drop(push);
        let pop = queue.pop();
        assert_send(&pop);
    }

    #[test]
    fn dropping_an_unpolled_future_is_fine() {
        let queue = Bounded::<usize>::new(1);
        drop(queue.push(1));
        drop(queue.pop());
        assert!(queue.is_empty());
    }
}
