//! A closable MPMC channel over a [`Bounded`] ring.
//!
//! The channel couples queue readiness with a one-shot *close* event. Close
//! state is a boolean plus a `close_epoch` counter: asynchronous operations
//! park a second waiter on `close_epoch + 1` in a dedicated registry, and
//! the first (and only effective) [`close`](Channel::close) bumps the epoch
//! and wakes everyone parked on it. Values already buffered at close time
//! are still delivered: pops drain the ring before reporting
//! [`ErrorKind::ChannelClosed`], while pushes are rejected immediately.
//!
//! [`Channel`], [`Sender`], and [`Receiver`] all share ownership of one
//! channel state; [`split`](Channel::split) just hands out the two
//! direction-restricted views.
use crate::{
    bounded::Bounded,
    error::{ErrorKind, Outcome, TryPushError},
    future::{Deadline, Pop, Push, Queue, WakeCell},
    loom::atomic::{AtomicBool, AtomicU64, Ordering::*},
    notify::{Notify, WaitRegistration, Waiter},
    scheduler::{SchedulerContext, TimedSchedulerContext},
    stop::StopToken,
};
use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use pin_project::{pin_project, pinned_drop};
use std::sync::Arc;

/// Returns a new closable channel of the given capacity, split into its two
/// endpoints.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    Channel::new(capacity).split()
}

/// A bounded MPMC channel that can be closed exactly once.
///
/// Cloning shares the same underlying channel.
pub struct Channel<T> {
    state: Arc<State<T>>,
}

/// The pushing half of a [`Channel`]. Cloneable; any holder may also close
/// the channel.
pub struct Sender<T> {
    state: Arc<State<T>>,
}

/// The popping half of a [`Channel`]. Cloneable; any holder may also close
/// the channel.
pub struct Receiver<T> {
    state: Arc<State<T>>,
}

struct State<T> {
    queue: Bounded<T>,
    close_waiters: Notify,
    close_epoch: AtomicU64,
    closed: AtomicBool,
}

// === impl State ===

impl<T> State<T> {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Bounded::new(capacity),
            close_waiters: Notify::new(),
            close_epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        if self.closed.load(Acquire) {
            return Err(TryPushError::Closed(value));
        }
        self.queue.try_push(value)
    }

    fn try_pop(&self) -> Outcome<T> {
        match self.queue.try_pop() {
            // Buffered values drain first; only an empty closed channel
            // reports the terminal error.
            Err(ErrorKind::QueueEmpty) if self.closed.load(Acquire) => {
                Err(ErrorKind::ChannelClosed)
            }
            other => other,
        }
    }

    fn close(&self) -> bool {
        if test_dbg!(self.closed.swap(true, AcqRel)) {
            return false;
        }
        let epoch = self.close_epoch.fetch_add(1, AcqRel) + 1;
        tracing::debug!(epoch, "closing channel");
        self.close_waiters
            .notify(&self.close_epoch as *const AtomicU64, epoch);
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }
}

// === impl Channel ===

impl<T> Channel<T> {
    /// Returns a new channel holding up to `capacity` in-flight values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: State::new(capacity),
        }
    }

    /// Splits off a ([`Sender`], [`Receiver`]) pair sharing this channel.
    pub fn split(&self) -> (Sender<T>, Receiver<T>) {
        (
            Sender {
                state: self.state.clone(),
            },
            Receiver {
                state: self.state.clone(),
            },
        )
    }

    /// Attempts to enqueue without waiting. Fails with
    /// [`TryPushError::Closed`] once the channel is closed.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        self.state.try_push(value)
    }

    /// Attempts to dequeue without waiting. A closed channel still yields
    /// its buffered values before reporting
    /// [`ErrorKind::ChannelClosed`].
    pub fn try_pop(&self) -> Outcome<T> {
        self.state.try_pop()
    }

    /// Closes the channel, waking every parked producer and consumer.
    /// Returns `true` for exactly one caller; all later calls return
    /// `false`.
    pub fn close(&self) -> bool {
        self.state.close()
    }

    /// `true` once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// The channel's buffer capacity.
    pub fn capacity(&self) -> usize {
        self.state.queue.capacity()
    }

    /// Snapshot of the buffered value count. Approximate.
    pub fn approximate_depth(&self) -> usize {
        self.state.queue.approximate_depth()
    }

    /// Enqueues `value`, waiting for capacity; completes with
    /// [`ErrorKind::ChannelClosed`] if the channel closes first.
    pub fn push(&self, value: T) -> ChannelPush<'_, T> {
        ChannelPush::new(&self.state, value)
    }

    /// Dequeues a value, waiting for one; completes with
    /// [`ErrorKind::ChannelClosed`] only after the buffer has drained.
    pub fn pop(&self) -> ChannelPop<'_, T> {
        ChannelPop::new(&self.state)
    }

    /// [`push`](Self::push) with a deadline; see [`Queue::push_until`].
    pub fn push_until<C>(
        &self,
        context: &C,
        deadline: C::Instant,
        value: T,
    ) -> ChannelPushUntil<'_, T, C::Sleep>
    where
        C: TimedSchedulerContext,
    {
        Deadline::new(self.push(value), context.sleep_until(deadline))
    }

    /// [`pop`](Self::pop) with a deadline; see [`Queue::pop_until`].
    pub fn pop_until<C>(&self, context: &C, deadline: C::Instant) -> ChannelPopUntil<'_, T, C::Sleep>
    where
        C: TimedSchedulerContext,
    {
        Deadline::new(self.pop(), context.sleep_until(deadline))
    }

    /// Callback-shaped push; the handler receives the outcome exactly once.
    pub fn push_detached<C, F>(&self, context: &C, value: T, handler: F, stop: StopToken)
    where
        T: Send + 'static,
        C: SchedulerContext,
        F: FnOnce(Outcome<()>) + Send + 'static,
    {
        push_detached_impl(&self.state, context, value, handler, stop)
    }

    /// Callback-shaped pop; the handler receives the outcome exactly once.
    pub fn pop_detached<C, F>(&self, context: &C, handler: F, stop: StopToken)
    where
        T: Send + 'static,
        C: SchedulerContext,
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        pop_detached_impl(&self.state, context, handler, stop)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.capacity())
            .field("depth", &self.approximate_depth())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// === impl Sender ===

impl<T> Sender<T> {
    /// See [`Channel::try_push`].
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        self.state.try_push(value)
    }

    /// See [`Channel::close`].
    pub fn close(&self) -> bool {
        self.state.close()
    }

    /// See [`Channel::is_closed`].
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// See [`Channel::capacity`].
    pub fn capacity(&self) -> usize {
        self.state.queue.capacity()
    }

    /// See [`Channel::approximate_depth`].
    pub fn approximate_depth(&self) -> usize {
        self.state.queue.approximate_depth()
    }

    /// See [`Channel::push`].
    pub fn push(&self, value: T) -> ChannelPush<'_, T> {
        ChannelPush::new(&self.state, value)
    }

    /// See [`Channel::push_until`].
    pub fn push_until<C>(
        &self,
        context: &C,
        deadline: C::Instant,
        value: T,
    ) -> ChannelPushUntil<'_, T, C::Sleep>
    where
        C: TimedSchedulerContext,
    {
        Deadline::new(self.push(value), context.sleep_until(deadline))
    }

    /// See [`Channel::push_detached`].
    pub fn push_detached<C, F>(&self, context: &C, value: T, handler: F, stop: StopToken)
    where
        T: Send + 'static,
        C: SchedulerContext,
        F: FnOnce(Outcome<()>) + Send + 'static,
    {
        push_detached_impl(&self.state, context, value, handler, stop)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// === impl Receiver ===

impl<T> Receiver<T> {
    /// See [`Channel::try_pop`].
    pub fn try_pop(&self) -> Outcome<T> {
        self.state.try_pop()
    }

    /// See [`Channel::close`].
    pub fn close(&self) -> bool {
        self.state.close()
    }

    /// See [`Channel::is_closed`].
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// See [`Channel::capacity`].
    pub fn capacity(&self) -> usize {
        self.state.queue.capacity()
    }

    /// See [`Channel::approximate_depth`].
    pub fn approximate_depth(&self) -> usize {
        self.state.queue.approximate_depth()
    }

    /// See [`Channel::pop`].
    pub fn pop(&self) -> ChannelPop<'_, T> {
        ChannelPop::new(&self.state)
    }

    /// See [`Channel::pop_until`].
    pub fn pop_until<C>(&self, context: &C, deadline: C::Instant) -> ChannelPopUntil<'_, T, C::Sleep>
    where
        C: TimedSchedulerContext,
    {
        Deadline::new(self.pop(), context.sleep_until(deadline))
    }

    /// See [`Channel::pop_detached`].
    pub fn pop_detached<C, F>(&self, context: &C, handler: F, stop: StopToken)
    where
        T: Send + 'static,
        C: SchedulerContext,
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        pop_detached_impl(&self.state, context, handler, stop)
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// === futures ===

/// Parks on the channel's close epoch; resolves once the channel closes.
#[pin_project(PinnedDrop)]
struct CloseWait<'ch, T> {
    state: &'ch State<T>,
    wake: WakeCell,
    #[pin]
    waiter: Waiter,
}

impl<'ch, T> CloseWait<'ch, T> {
    fn new(state: &'ch State<T>) -> Self {
        Self {
            state,
            wake: WakeCell::new(),
            waiter: Waiter::new(),
        }
    }
}

impl<'ch, T> Future for CloseWait<'ch, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if this.wake.cancel_wait() {
            unsafe { this.state.close_waiters.disarm(this.waiter.as_ref()) };
        }

        loop {
            if test_dbg!(this.state.closed.load(Acquire)) {
                return Poll::Ready(());
            }

            this.wake.set_waker(cx.waker());
            let turn_ptr = &this.state.close_epoch as *const AtomicU64;
            let expected_turn = this.state.close_epoch.load(Acquire) + 1;
            this.waiter.as_mut().prepare(
                WaitRegistration {
                    turn_ptr,
                    expected_turn,
                    channel_hint: Notify::suggest_channel_index(turn_ptr, expected_turn),
                },
                this.wake.owner_ptr(),
                WakeCell::wake,
            );
            this.wake.begin_wait();

            if unsafe { this.state.close_waiters.arm(this.waiter.as_ref()) } {
                return Poll::Pending;
            }
            // The epoch moved while arming, which can only mean a close;
            // loop back to observe it.
            this.wake.cancel_wait();
        }
    }
}

#[pinned_drop]
impl<'ch, T> PinnedDrop for CloseWait<'ch, T> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.wake.cancel_wait();
        unsafe { this.state.close_waiters.disarm(this.waiter.as_ref()) };
    }
}

/// Future returned by [`Channel::push`] and [`Sender::push`]: when-any of
/// the ring push and the close event.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ChannelPush<'ch, T> {
    stop: StopToken,
    #[pin]
    close: CloseWait<'ch, T>,
    #[pin]
    push: Push<'ch, T, Bounded<T>>,
}

impl<'ch, T> ChannelPush<'ch, T> {
    fn new(state: &'ch State<T>, value: T) -> Self {
        Self {
            stop: StopToken::never(),
            close: CloseWait::new(state),
            push: state.queue.push(value),
        }
    }

    /// Attaches a cancellation token. Must be called before the first poll.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }
}

impl<'ch, T> Future for ChannelPush<'ch, T> {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.stop.stop_requested() {
            return Poll::Ready(Err(ErrorKind::Canceled));
        }
        this.stop.register(cx.waker());

        // A closed channel rejects the value even if the ring has room.
        if this.close.poll(cx).is_ready() {
            return Poll::Ready(Err(ErrorKind::ChannelClosed));
        }
        this.push.poll(cx)
    }
}

/// Future returned by [`Channel::pop`] and [`Receiver::pop`]: when-any of
/// the ring pop and the close event, with a post-close drain.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ChannelPop<'ch, T> {
    state: &'ch State<T>,
    stop: StopToken,
    #[pin]
    close: CloseWait<'ch, T>,
    #[pin]
    pop: Pop<'ch, T, Bounded<T>>,
}

impl<'ch, T> ChannelPop<'ch, T> {
    fn new(state: &'ch State<T>) -> Self {
        Self {
            state,
            stop: StopToken::never(),
            close: CloseWait::new(state),
            pop: state.queue.pop(),
        }
    }

    /// Attaches a cancellation token. Must be called before the first poll.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }
}

impl<'ch, T> Future for ChannelPop<'ch, T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.stop.stop_requested() {
            return Poll::Ready(Err(ErrorKind::Canceled));
        }
        this.stop.register(cx.waker());

        // Buffered values win over the close event.
        if let Poll::Ready(outcome) = this.pop.poll(cx) {
            return Poll::Ready(outcome);
        }
        if this.close.poll(cx).is_ready() {
            // One more look at the ring: a value may have been buffered
            // between our pop attempt and the close.
            return Poll::Ready(match this.state.queue.try_pop() {
                Ok(value) => Ok(value),
                Err(ErrorKind::QueueEmpty) => Err(ErrorKind::ChannelClosed),
                Err(other) => Err(other),
            });
        }
        Poll::Pending
    }
}

/// Future returned by [`Channel::push_until`] and [`Sender::push_until`].
pub type ChannelPushUntil<'ch, T, S> = Deadline<ChannelPush<'ch, T>, S>;
/// Future returned by [`Channel::pop_until`] and [`Receiver::pop_until`].
pub type ChannelPopUntil<'ch, T, S> = Deadline<ChannelPop<'ch, T>, S>;

fn push_detached_impl<T, C, F>(
    state: &Arc<State<T>>,
    context: &C,
    value: T,
    handler: F,
    stop: StopToken,
) where
    T: Send + 'static,
    C: SchedulerContext,
    F: FnOnce(Outcome<()>) + Send + 'static,
{
    if stop.stop_requested() {
        handler(Err(ErrorKind::Canceled));
        return;
    }

    let state = Arc::clone(state);
    context.spawn(async move {
        let mut status = ChannelPush::new(&state, value)
            .with_stop_token(stop.clone())
            .await;
        if stop.stop_requested() && status.is_ok() {
            status = Err(ErrorKind::Canceled);
        }
        handler(status);
    });
}

fn pop_detached_impl<T, C, F>(state: &Arc<State<T>>, context: &C, handler: F, stop: StopToken)
where
    T: Send + 'static,
    C: SchedulerContext,
    F: FnOnce(Outcome<T>) + Send + 'static,
{
    if stop.stop_requested() {
        handler(Err(ErrorKind::Canceled));
        return;
    }

    let state = Arc::clone(state);
    context.spawn(async move {
        let mut status = ChannelPop::new(&state).with_stop_token(stop.clone()).await;
        if stop.stop_requested() && status.is_ok() {
            status = Err(ErrorKind::Canceled);
        }
        handler(status);
    });
}

#[cfg(all(loom, test))]
mod loom_tests {
    use super::*;
    use crate::loom::{self, thread};

    #[test]
    fn close_is_one_shot_under_race() {
        loom::model(|| {
            let chan = Channel::<i32>::new(1);
            let other = {
                let chan = chan.clone();
                thread::spawn(move || chan.close())
            };
            let here = chan.close();
            let there = other.join().unwrap();
            assert!(here ^ there, "exactly one close() must win");
        });
    }

    #[test]
    fn close_races_with_push() {
        loom::model(|| {
            let chan = Channel::new(1);
            let pusher = {
                let chan = chan.clone();
                thread::spawn(move || chan.try_push(7).is_ok())
            };
            assert!(chan.close());
            let pushed = pusher.join().unwrap();

            // A value that made it in is still drained; a rejected push
            // leaves the channel empty and closed.
            match chan.try_pop() {
                Ok(value) => {
                    assert_eq!(value, 7);
                    assert!(pushed);
                    assert_eq!(chan.try_pop().unwrap_err(), ErrorKind::ChannelClosed);
                }
                Err(err) => {
                    assert_eq!(err, ErrorKind::ChannelClosed);
                    assert!(!pushed);
                }
            }
        });
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn try_api_and_close_drain() {
        let chan = Channel::new(4);

        assert_eq!(chan.try_pop().unwrap_err(), ErrorKind::QueueEmpty);

        chan.try_push(11).unwrap();
        assert!(chan.close());
        assert!(!chan.close());

        assert_eq!(chan.try_pop().unwrap(), 11);
        assert_eq!(chan.try_pop().unwrap_err(), ErrorKind::ChannelClosed);

        let rejected = chan.try_push(17).unwrap_err();
        assert!(rejected.is_closed());
        assert_eq!(rejected.into_inner(), 17);
    }

    #[test]
    fn split_halves_share_state() {
        let chan = Channel::new(8);
        let (tx, rx) = chan.split();

        tx.try_push(21).unwrap();
        assert_eq!(rx.try_pop().unwrap(), 21);

        assert!(tx.close());
        assert!(rx.is_closed());
        assert_eq!(rx.try_pop().unwrap_err(), ErrorKind::ChannelClosed);
    }

    #[test]
    fn either_half_may_close_first_wins() {
        let (tx, rx) = channel::<i32>(1);
        assert!(rx.close());
        assert!(!tx.close());
        assert!(tx.try_push(1).unwrap_err().is_closed());
    }

    #[test]
    fn close_wakes_parked_push_future() {
        use futures::task::noop_waker;

        let chan = Channel::new(1);
        chan.try_push(1).unwrap();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut push = Box::pin(chan.push(2));
        assert!(push.as_mut().poll(&mut cx).is_pending());

        assert!(chan.close());
        match push.as_mut().poll(&mut cx) {
            Poll::Ready(Err(ErrorKind::ChannelClosed)) => {}
            other => panic!("expected ChannelClosed, got {:?}", other.map(|r| r.err())),
        }
        drop(push);

        // The buffered value is still there for draining.
        assert_eq!(chan.try_pop().unwrap(), 1);
        assert_eq!(chan.try_pop().unwrap_err(), ErrorKind::ChannelClosed);
    }

    #[test]
    fn pop_future_drains_buffered_values_after_close() {
        use futures::task::noop_waker;

        let chan = Channel::new(8);
        chan.try_push(31).unwrap();
        chan.try_push(32).unwrap();
        assert!(chan.close());

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        for expected in [31, 32] {
            let mut pop = Box::pin(chan.pop());
            match pop.as_mut().poll(&mut cx) {
                Poll::Ready(Ok(value)) => assert_eq!(value, expected),
                other => panic!("expected value, got {:?}", other.map(|r| r.ok())),
            }
        }

        let mut pop = Box::pin(chan.pop());
        match pop.as_mut().poll(&mut cx) {
            Poll::Ready(Err(ErrorKind::ChannelClosed)) => {}
            other => panic!("expected ChannelClosed, got {:?}", other.map(|r| r.ok())),
        }
    }

    #[test]
    fn stop_token_cancels_parked_pop() {
        use futures::task::noop_waker;

        let chan = Channel::<i32>::new(1);
        let source = crate::StopSource::new();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut pop = Box::pin(chan.pop().with_stop_token(source.token()));
        assert!(pop.as_mut().poll(&mut cx).is_pending());

        assert!(source.request_stop());
        match pop.as_mut().poll(&mut cx) {
            Poll::Ready(Err(ErrorKind::Canceled)) => {}
            other => panic!("expected Canceled, got {:?}", other.map(|r| r.ok())),
        }
    }
}
