//! Fixed-capacity MPMC ring.
//!
//! Producers and consumers claim monotonically increasing *tickets* from two
//! shared counters; a ticket maps to a slot (spread by a stride coprime to
//! the capacity) and to the *turn* the slot must show before the claim can
//! go through. The fast path is a handful of loads and one CAS; when a slot
//! isn't ready and the ticket counter hasn't moved, the queue really is full
//! (or empty) and `try_push`/`try_pop` say so instead of spinning forever.
use crate::{
    error::{ErrorKind, Outcome, TryPushError},
    loom::atomic::{AtomicU64, Ordering::*},
    notify::{Notify, WaitRegistration, Waiter},
    slot::{self, Slot},
    util::CachePadded,
};
use core::{fmt, pin::Pin};

/// A bounded multi-producer, multi-consumer FIFO queue.
///
/// All operations take `&self` and are safe from any thread. The queue
/// cannot be cloned or moved while shared; wrap it in an
/// [`Arc`](std::sync::Arc) to share it.
pub struct Bounded<T> {
    capacity: usize,
    stride: u64,
    slots: Box<[Slot<T>]>,
    push_ticket: CachePadded<AtomicU64>,
    pop_ticket: CachePadded<AtomicU64>,
    /// Producers parked on a slot-empty turn; woken by `try_pop`.
    push_waiters: Notify,
    /// Consumers parked on a slot-full turn; woken by `try_push`.
    pop_waiters: Notify,
}

// === impl Bounded ===

impl<T> Bounded<T> {
    /// Returns a new bounded queue holding up to `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a queue must have capacity for at least one value");
        Self {
            capacity,
            stride: slot::compute_stride(capacity),
            slots: Slot::make_boxed_array(capacity),
            push_ticket: CachePadded(AtomicU64::new(0)),
            pop_ticket: CachePadded(AtomicU64::new(0)),
            push_waiters: Notify::new(),
            pop_waiters: Notify::new(),
        }
    }

    /// Attempts to enqueue `value` without waiting.
    ///
    /// Fails with [`TryPushError::Full`], handing the value back, only when
    /// the queue was consistently observed full: the target slot still held
    /// an older turn while the push ticket stayed put.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let mut ticket = self.push_ticket.load(Relaxed);
        loop {
            let slot = self.slot_for_ticket(ticket);
            let expected_turn = slot::enqueue_turn(ticket, self.capacity);

            if slot.turn.load(Acquire) != expected_turn {
                // The slot is behind. If the ticket counter also hasn't
                // moved, no concurrent pop freed anything: full.
                let observed = ticket;
                ticket = self.push_ticket.load(Relaxed);
                if observed == ticket {
                    return Err(TryPushError::Full(value));
                }
                continue;
            }

            match self
                .push_ticket
                .compare_exchange_weak(ticket, ticket + 1, Relaxed, Relaxed)
            {
                Ok(_) => {
                    // The ticket (and with it the slot's current turn) is
                    // ours; publish with the odd turn once the value is in.
                    unsafe { slot.write(value) };
                    let publish_turn = expected_turn + 1;
                    slot.turn.store(publish_turn, Release);
                    self.pop_waiters
                        .notify(&slot.turn as *const AtomicU64, publish_turn);
                    return Ok(());
                }
                Err(actual) => {
                    ticket = actual;
                    continue;
                }
            }
        }
    }

    /// Attempts to dequeue a value without waiting.
    ///
    /// Fails with [`ErrorKind::QueueEmpty`] only when the queue was
    /// consistently observed empty.
    pub fn try_pop(&self) -> Outcome<T> {
        let mut ticket = self.pop_ticket.load(Relaxed);
        loop {
            let slot = self.slot_for_ticket(ticket);
            let expected_turn = slot::dequeue_turn(ticket, self.capacity);

            if slot.turn.load(Acquire) != expected_turn {
                let observed = ticket;
                ticket = self.pop_ticket.load(Relaxed);
                if observed == ticket {
                    return Err(ErrorKind::QueueEmpty);
                }
                continue;
            }

            match self
                .pop_ticket
                .compare_exchange_weak(ticket, ticket + 1, Relaxed, Relaxed)
            {
                Ok(_) => {
                    let value = unsafe { slot.take() };
                    let publish_turn = expected_turn + 1;
                    slot.turn.store(publish_turn, Release);
                    self.push_waiters
                        .notify(&slot.turn as *const AtomicU64, publish_turn);
                    return Ok(value);
                }
                Err(actual) => {
                    ticket = actual;
                    continue;
                }
            }
        }
    }

    /// The number of values this queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Same as [`capacity`](Self::capacity); a bounded queue never grows.
    pub fn max_capacity(&self) -> usize {
        self.capacity
    }

    /// Total successful pushes over the queue's lifetime.
    pub fn push_count(&self) -> u64 {
        self.write_count()
    }

    /// Total successful pops over the queue's lifetime.
    pub fn pop_count(&self) -> u64 {
        self.read_count()
    }

    /// Snapshot of the current depth. Racy by nature: it may disagree with
    /// an immediately following `try_pop`.
    pub fn approximate_depth(&self) -> usize {
        self.write_count().wrapping_sub(self.read_count()) as usize
    }

    /// Signed depth estimate; negative values can transiently appear when
    /// the two counters are read around a concurrent operation.
    pub fn size_guess(&self) -> i64 {
        self.write_count().wrapping_sub(self.read_count()) as i64
    }

    /// `true` if the queue was observed empty. Approximate.
    pub fn is_empty(&self) -> bool {
        self.write_count() == self.read_count()
    }

    /// `true` if the queue was observed at capacity. Approximate.
    pub fn is_full(&self) -> bool {
        self.approximate_depth() >= self.capacity
    }

    /// `true` when the fast path compiles to native atomic operations.
    pub fn lock_free(&self) -> bool {
        cfg!(target_has_atomic = "64")
    }

    /// `false`: this ring never grows. See [`Dynamic`](crate::Dynamic).
    pub fn dynamic_growth_enabled(&self) -> bool {
        false
    }

    /// Raw push-ticket value; equal to [`push_count`](Self::push_count).
    pub fn write_count(&self) -> u64 {
        self.push_ticket.load(Relaxed)
    }

    /// Raw pop-ticket value; equal to [`pop_count`](Self::pop_count).
    pub fn read_count(&self) -> u64 {
        self.pop_ticket.load(Relaxed)
    }

    #[inline]
    fn slot_for_ticket(&self, ticket: u64) -> &Slot<T> {
        &self.slots[Slot::<T>::PADDING + slot::ring_index(ticket, self.capacity, self.stride)]
    }

    pub(crate) fn push_registration(&self) -> WaitRegistration {
        let ticket = self.push_ticket.load(Relaxed);
        let slot = self.slot_for_ticket(ticket);
        let turn_ptr = &slot.turn as *const AtomicU64;
        let expected_turn = slot::enqueue_turn(ticket, self.capacity);
        WaitRegistration {
            turn_ptr,
            expected_turn,
            channel_hint: Notify::suggest_channel_index(turn_ptr, expected_turn),
        }
    }

    pub(crate) fn pop_registration(&self) -> WaitRegistration {
        let ticket = self.pop_ticket.load(Relaxed);
        let slot = self.slot_for_ticket(ticket);
        let turn_ptr = &slot.turn as *const AtomicU64;
        let expected_turn = slot::dequeue_turn(ticket, self.capacity);
        WaitRegistration {
            turn_ptr,
            expected_turn,
            channel_hint: Notify::suggest_channel_index(turn_ptr, expected_turn),
        }
    }

    pub(crate) unsafe fn arm_push_waiter(&self, waiter: Pin<&Waiter>) -> bool {
        self.push_waiters.arm(waiter)
    }

    pub(crate) unsafe fn disarm_push_waiter(&self, waiter: Pin<&Waiter>) {
        self.push_waiters.disarm(waiter)
    }

    pub(crate) unsafe fn arm_pop_waiter(&self, waiter: Pin<&Waiter>) -> bool {
        self.pop_waiters.arm(waiter)
    }

    pub(crate) unsafe fn disarm_pop_waiter(&self, waiter: Pin<&Waiter>) {
        self.pop_waiters.disarm(waiter)
    }
}

impl<T> Drop for Bounded<T> {
    fn drop(&mut self) {
        // Any value still in the ring lives in a slot with an odd turn;
        // popping is the one place that knows how to find them all.
        while self.try_pop().is_ok() {}
    }
}

impl<T> fmt::Debug for Bounded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bounded")
            .field("capacity", &self.capacity)
            .field("depth", &self.approximate_depth())
            .finish()
    }
}

unsafe impl<T: Send> Send for Bounded<T> {}
unsafe impl<T: Send> Sync for Bounded<T> {}


#[cfg(all(loom, test))]
mod loom_tests {
    use super::*;
    use crate::loom::{self, sync::Arc, thread};

    #[test]
    fn two_producers_one_consumer() {
        loom::model(|| {
            let queue = Arc::new(Bounded::new(2));

            let producers: Vec<_> = (0..2)
                .map(|value| {
                    let queue = queue.clone();
                    thread::spawn(move || loop {
                        match queue.try_push(value) {
                            Ok(()) => break,
                            Err(_) => thread::yield_now(),
                        }
                    })
                })
                .collect();

            let mut seen = Vec::new();
            while seen.len() < 2 {
                match queue.try_pop() {
                    Ok(value) => seen.push(value),
                    Err(_) => thread::yield_now(),
                }
            }

            for producer in producers {
                producer.join().unwrap();
            }

            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1]);
            assert!(queue.is_empty());
        });
    }
}
