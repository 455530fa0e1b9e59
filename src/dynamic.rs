//! Growable MPMC ring.
//!
//! Same turn discipline as [`Bounded`](crate::Bounded), plus in-place
//! expansion: when a producer observes the active array full and nothing
//! else has retired it yet, it allocates a larger array and *closes* the old
//! one. Closed arrays are kept (never compacted) so every outstanding ticket
//! issued against them still resolves to the same slot and the same turn
//! sequence; they are freed only when the queue is dropped.
//!
//! The active array descriptor lives behind a seqlock packed into one state
//! word: the low bit is the writer-in-progress flag, the next seven bits
//! count closed arrays, and the high bits hold the ticket offset at which
//! the active array takes effect.
use crate::{
    error::{ErrorKind, Outcome, TryPushError},
    loom::{
        atomic::{self, AtomicPtr, AtomicU64, AtomicUsize, Ordering::*},
        UnsafeCell,
    },
    notify::{Notify, WaitRegistration, Waiter},
    slot::{self, Slot},
    util::{spin_pause, CachePadded},
};
use core::{fmt, pin::Pin};

const SEQLOCK_BITS: u32 = 8;
const SEQLOCK_MASK: u64 = (1 << SEQLOCK_BITS) - 1;

/// Growth policy for a [`Dynamic`] queue.
#[derive(Debug, Clone, Copy)]
pub struct DynamicOptions {
    /// Hard capacity ceiling. Zero means the queue never grows beyond its
    /// initial capacity.
    pub max_capacity: usize,
    /// Multiplier applied on each expansion; values below 2 are clamped up.
    pub growth_factor: usize,
}

impl Default for DynamicOptions {
    fn default() -> Self {
        Self {
            max_capacity: 0,
            growth_factor: 2,
        }
    }
}

/// A multi-producer, multi-consumer FIFO queue that grows on demand up to a
/// fixed ceiling.
pub struct Dynamic<T> {
    max_capacity: usize,
    growth_factor: usize,
    max_closed_arrays: usize,
    /// Retired arrays, append-only, written by the expanding producer while
    /// it holds the seqlock writer bit and read by anyone who observed a
    /// state word published afterwards.
    closed: Box<[UnsafeCell<ClosedArray<T>>]>,
    active_slots: AtomicPtr<Slot<T>>,
    active_capacity: AtomicUsize,
    active_stride: AtomicU64,
    state: AtomicU64,
    push_ticket: CachePadded<AtomicU64>,
    pop_ticket: CachePadded<AtomicU64>,
    push_waiters: Notify,
    pop_waiters: Notify,
}

struct ClosedArray<T> {
    offset: u64,
    slots: *mut Slot<T>,
    capacity: usize,
    stride: u64,
}

/// A consistent view of the active array, captured under the seqlock.
struct ActiveView<T> {
    state: u64,
    slots: *mut Slot<T>,
    capacity: usize,
    stride: u64,
}

/// The array (active or closed) a particular ticket resolves to.
struct TicketView<T> {
    offset: u64,
    slots: *mut Slot<T>,
    capacity: usize,
    stride: u64,
}

// The views only hold raw pointers, so they are copyable for any `T`; the
// derives would demand `T: Clone`.
impl<T> Clone for ClosedArray<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ClosedArray<T> {}

impl<T> Clone for ActiveView<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ActiveView<T> {}

impl<T> Clone for TicketView<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for TicketView<T> {}

// === impl Dynamic ===

impl<T> Dynamic<T> {
    /// Default initial capacity used by [`Dynamic::new`], mirroring the
    /// growth behavior of the queue this design derives from.
    pub const DEFAULT_MIN_CAPACITY: usize = 10;
    const DEFAULT_GROWTH_FACTOR: usize = 10;

    /// Returns a queue that may grow up to `max_capacity` values, seeded
    /// small (at most [`DEFAULT_MIN_CAPACITY`](Self::DEFAULT_MIN_CAPACITY)).
    ///
    /// # Panics
    ///
    /// Panics if `max_capacity` is zero.
    pub fn new(max_capacity: usize) -> Self {
        assert!(max_capacity > 0, "a queue must have capacity for at least one value");
        Self::with_options(
            Self::DEFAULT_MIN_CAPACITY.min(max_capacity),
            DynamicOptions {
                max_capacity,
                growth_factor: Self::DEFAULT_GROWTH_FACTOR,
            },
        )
    }

    /// Returns a queue starting at `initial_capacity` slots, growing per
    /// `options`.
    ///
    /// # Panics
    ///
    /// Panics if `initial_capacity` is zero.
    pub fn with_options(initial_capacity: usize, options: DynamicOptions) -> Self {
        assert!(initial_capacity > 0, "a queue must have capacity for at least one value");
        let max_capacity = if options.max_capacity == 0 {
            initial_capacity
        } else {
            options.max_capacity.max(initial_capacity)
        };
        let growth_factor = options.growth_factor.max(2);
        let max_closed_arrays =
            max_closed_arrays(initial_capacity, max_capacity, growth_factor);

        Self {
            max_capacity,
            growth_factor,
            max_closed_arrays,
            closed: (0..max_closed_arrays)
                .map(|_| {
                    UnsafeCell::new(ClosedArray {
                        offset: 0,
                        slots: core::ptr::null_mut(),
                        capacity: 0,
                        stride: 1,
                    })
                })
                .collect(),
            active_slots: AtomicPtr::new(Slot::alloc_raw_array(initial_capacity)),
            active_capacity: AtomicUsize::new(initial_capacity),
            active_stride: AtomicU64::new(slot::compute_stride(initial_capacity)),
            state: AtomicU64::new(0),
            push_ticket: CachePadded(AtomicU64::new(0)),
            pop_ticket: CachePadded(AtomicU64::new(0)),
            push_waiters: Notify::new(),
            pop_waiters: Notify::new(),
        }
    }

    /// Attempts to enqueue `value`, growing the queue if the active array is
    /// full and the ceiling allows it.
    ///
    /// Fails with [`TryPushError::Full`] only when expansion is impossible:
    /// the queue already holds `max_capacity` values, or the growth schedule
    /// is exhausted.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        if self.approximate_depth() >= self.max_capacity {
            return Err(TryPushError::Full(value));
        }

        loop {
            let ticket = self.push_ticket.load(Relaxed);

            let active = match self.seqlock_read() {
                Some(active) => active,
                None => {
                    spin_pause();
                    continue;
                }
            };
            let view = self.locate_ticket(active, ticket);

            let local_ticket = ticket - view.offset;
            let target = unsafe { self.slot_at(view, local_ticket) };
            let expected_turn = slot::enqueue_turn(local_ticket, view.capacity);

            if target.turn.load(Acquire) == expected_turn {
                if self
                    .push_ticket
                    .compare_exchange(ticket, ticket + 1, Relaxed, Relaxed)
                    .is_err()
                {
                    continue;
                }

                unsafe { target.write(value) };
                let publish_turn = expected_turn + 1;
                target.turn.store(publish_turn, Release);
                self.pop_waiters
                    .notify(&target.turn as *const AtomicU64, publish_turn);
                return Ok(());
            }

            if ticket != self.push_ticket.load(Relaxed) {
                continue;
            }

            if view.offset == state_offset(active.state) && self.try_expand(active.state, view.capacity)
            {
                continue;
            }
            return Err(TryPushError::Full(value));
        }
    }

    /// Attempts to dequeue a value without waiting.
    pub fn try_pop(&self) -> Outcome<T> {
        loop {
            let ticket = self.pop_ticket.load(Relaxed);

            let active = match self.seqlock_read() {
                Some(active) => active,
                None => {
                    spin_pause();
                    continue;
                }
            };
            let view = self.locate_ticket(active, ticket);

            let local_ticket = ticket - view.offset;
            let target = unsafe { self.slot_at(view, local_ticket) };
            let expected_turn = slot::dequeue_turn(local_ticket, view.capacity);

            if target.turn.load(Acquire) != expected_turn {
                return Err(ErrorKind::QueueEmpty);
            }

            if self
                .pop_ticket
                .compare_exchange(ticket, ticket + 1, Relaxed, Relaxed)
                .is_err()
            {
                continue;
            }

            let value = unsafe { target.take() };
            let publish_turn = expected_turn + 1;
            target.turn.store(publish_turn, Release);
            self.push_waiters
                .notify(&target.turn as *const AtomicU64, publish_turn);
            return Ok(value);
        }
    }

    /// The capacity of the currently active array.
    pub fn capacity(&self) -> usize {
        self.active_capacity.load(Relaxed)
    }

    /// The ceiling this queue may grow to.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Same as [`capacity`](Self::capacity).
    pub fn allocated_capacity(&self) -> usize {
        self.capacity()
    }

    /// Total successful pushes over the queue's lifetime.
    pub fn push_count(&self) -> u64 {
        self.write_count()
    }

    /// Total successful pops over the queue's lifetime.
    pub fn pop_count(&self) -> u64 {
        self.read_count()
    }

    /// Snapshot of the current depth. Approximate.
    pub fn approximate_depth(&self) -> usize {
        self.write_count().wrapping_sub(self.read_count()) as usize
    }

    /// Signed depth estimate.
    pub fn size_guess(&self) -> i64 {
        self.write_count().wrapping_sub(self.read_count()) as i64
    }

    /// `true` if the queue was observed empty. Approximate.
    pub fn is_empty(&self) -> bool {
        self.write_count() == self.read_count()
    }

    /// `true` if the queue was observed at its ceiling. Approximate.
    pub fn is_full(&self) -> bool {
        self.approximate_depth() >= self.max_capacity
    }

    /// `true` when the fast path compiles to native atomic operations.
    pub fn lock_free(&self) -> bool {
        cfg!(target_has_atomic = "64")
    }

    /// `true`: this ring grows. See [`Bounded`](crate::Bounded) for the
    /// fixed-capacity variant.
    pub fn dynamic_growth_enabled(&self) -> bool {
        true
    }

    /// Raw push-ticket value; equal to [`push_count`](Self::push_count).
    pub fn write_count(&self) -> u64 {
        self.push_ticket.load(Relaxed)
    }

    /// Raw pop-ticket value; equal to [`pop_count`](Self::pop_count).
    pub fn read_count(&self) -> u64 {
        self.pop_ticket.load(Relaxed)
    }

    /// Captures the active array descriptor, rejecting snapshots taken while
    /// a writer holds the seqlock or that a concurrent growth invalidated.
    fn seqlock_read(&self) -> Option<ActiveView<T>> {
        let state = self.state.load(Acquire);
        if state & 1 != 0 {
            return None;
        }

        let slots = self.active_slots.load(Relaxed);
        let capacity = self.active_capacity.load(Relaxed);
        let stride = self.active_stride.load(Relaxed);

        atomic::fence(Acquire);
        if state == self.state.load(Relaxed) {
            Some(ActiveView {
                state,
                slots,
                capacity,
                stride,
            })
        } else {
            None
        }
    }

    /// Resolves `ticket` to the array whose offset range contains it. A
    /// ticket older than the active array's offset matches exactly one
    /// closed array.
    fn locate_ticket(&self, active: ActiveView<T>, ticket: u64) -> TicketView<T> {
        let offset = state_offset(active.state);
        if ticket >= offset {
            return TicketView {
                offset,
                slots: active.slots,
                capacity: active.capacity,
                stride: active.stride,
            };
        }

        let num_closed = state_num_closed(active.state);
        for index in (0..num_closed).rev() {
            // Entries below `num_closed` were fully written before the state
            // word counting them was published (release store), and we read
            // that state word with acquire.
            let closed = self.closed[index].with(|entry| unsafe { *entry });
            if closed.offset <= ticket {
                return TicketView {
                    offset: closed.offset,
                    slots: closed.slots,
                    capacity: closed.capacity,
                    stride: closed.stride,
                };
            }
        }

        debug_assert!(false, "ticket {} matches no array", ticket);
        TicketView {
            offset,
            slots: active.slots,
            capacity: active.capacity,
            stride: active.stride,
        }
    }

    /// # Safety
    ///
    /// The view must come from [`seqlock_read`](Self::seqlock_read) /
    /// [`locate_ticket`](Self::locate_ticket) on this queue, so the slots
    /// pointer is valid for the queue's lifetime.
    #[inline]
    unsafe fn slot_at(&self, view: TicketView<T>, local_ticket: u64) -> &Slot<T> {
        let index =
            Slot::<T>::PADDING + slot::ring_index(local_ticket, view.capacity, view.stride);
        &*view.slots.add(index)
    }

    fn next_capacity(&self, current: usize) -> usize {
        if current >= self.max_capacity {
            return current;
        }

        let grown = if current > self.max_capacity / self.growth_factor {
            self.max_capacity
        } else {
            current * self.growth_factor
        };
        if grown <= current {
            return self.max_capacity;
        }
        grown.min(self.max_capacity)
    }

    /// Attempts to retire the active array and install a larger one.
    ///
    /// Returns `true` if the push should be retried (either growth succeeded
    /// or another thread won the writer race) and `false` if the queue
    /// cannot grow any further.
    fn try_expand(&self, state: u64, capacity: usize) -> bool {
        if capacity >= self.max_capacity {
            return false;
        }

        // Become the writer by making the state odd; losing the race means
        // someone else is growing, so just retry the push.
        if self
            .state
            .compare_exchange(state, state + 1, AcqRel, Relaxed)
            .is_err()
        {
            return true;
        }

        let expanded = self.next_capacity(capacity);
        if expanded <= capacity {
            self.state.store(state, Release);
            return false;
        }

        let closed_index = state_num_closed(state);
        if closed_index >= self.max_closed_arrays {
            self.state.store(state, Release);
            return false;
        }

        let new_slots = Slot::alloc_raw_array(expanded);

        // Tickets below this offset keep resolving through the closed list;
        // everything at or above it starts fresh in the new array.
        let ticket_offset =
            1 + self.push_ticket.load(Relaxed).max(self.pop_ticket.load(Relaxed));

        self.closed[closed_index].with_mut(|entry| {
            // Safety: we hold the writer bit, and readers cannot observe
            // index `closed_index` until the new state word is published.
            unsafe {
                *entry = ClosedArray {
                    offset: state_offset(state),
                    slots: self.active_slots.load(Relaxed),
                    capacity,
                    stride: self.active_stride.load(Relaxed),
                };
            }
        });

        self.active_slots.store(new_slots, Relaxed);
        self.active_capacity.store(expanded, Relaxed);
        self.active_stride
            .store(slot::compute_stride(expanded), Relaxed);

        tracing::debug!(
            from = capacity,
            to = expanded,
            offset = ticket_offset,
            "growing queue"
        );
        let new_state = (ticket_offset << SEQLOCK_BITS) + 2 * (closed_index as u64 + 1);
        self.state.store(new_state, Release);
        true
    }

    fn wait_registration(&self, ticket: u64, producer: bool) -> WaitRegistration {
        loop {
            let active = match self.seqlock_read() {
                Some(active) => active,
                None => {
                    spin_pause();
                    continue;
                }
            };
            let view = self.locate_ticket(active, ticket);

            let local_ticket = ticket - view.offset;
            let target = unsafe { self.slot_at(view, local_ticket) };
            let expected_turn = if producer {
                slot::enqueue_turn(local_ticket, view.capacity)
            } else {
                slot::dequeue_turn(local_ticket, view.capacity)
            };
            let turn_ptr = &target.turn as *const AtomicU64;
            return WaitRegistration {
                turn_ptr,
                expected_turn,
                channel_hint: Notify::suggest_channel_index(turn_ptr, expected_turn),
            };
        }
    }

    pub(crate) fn push_registration(&self) -> WaitRegistration {
        self.wait_registration(self.push_ticket.load(Relaxed), true)
    }

    pub(crate) fn pop_registration(&self) -> WaitRegistration {
        self.wait_registration(self.pop_ticket.load(Relaxed), false)
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

impl<T> Drop for Dynamic<T> {
    fn drop(&mut self) {
        while self.try_pop().is_ok() {}

        let state = self.state.load(Relaxed);
        let num_closed = state_num_closed(state);
        for index in (0..num_closed).rev() {
            self.closed[index].with_mut(|entry| {
                // Safety: drop has exclusive access; each closed entry below
                // `num_closed` owns a live array allocated by this queue.
                unsafe {
                    let entry = *entry;
                    slot::free_raw_array(entry.slots, entry.capacity);
                }
            });
        }

        let active = self.active_slots.load(Relaxed);
        let capacity = self.active_capacity.load(Relaxed);
        if !active.is_null() {
            // Safety: the active array was allocated by this queue and no
            // other thread can reference it any more.
            unsafe { slot::free_raw_array(active, capacity) };
        }
    }
}

impl<T> fmt::Debug for Dynamic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dynamic")
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity)
            .field("depth", &self.approximate_depth())
            .finish()
    }
}

unsafe impl<T: Send> Send for Dynamic<T> {}
unsafe impl<T: Send> Sync for Dynamic<T> {}

#[inline]
fn state_offset(state: u64) -> u64 {
    state >> SEQLOCK_BITS
}

#[inline]
fn state_num_closed(state: u64) -> usize {
    ((state & SEQLOCK_MASK) >> 1) as usize
}

/// How many arrays the growth schedule can ever retire, given the initial
/// capacity, ceiling, and factor. Bounds the closed-array storage.
fn max_closed_arrays(initial_capacity: usize, max_capacity: usize, growth_factor: usize) -> usize {
    if initial_capacity >= max_capacity {
        return 0;
    }

    let mut count = 0;
    let mut expanded = initial_capacity;
    while expanded < max_capacity {
        if expanded > max_capacity / growth_factor {
            expanded = max_capacity;
        } else {
            expanded *= growth_factor;
        }
        count += 1;
    }
    count
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn default_construction_seeds_small() {
        let queue: Dynamic<i32> = Dynamic::new(64);
        assert_eq!(queue.max_capacity(), 64);
        assert_eq!(queue.capacity(), 10);
        assert!(queue.dynamic_growth_enabled());

        let explicit: Dynamic<i32> = Dynamic::with_options(
            16,
            DynamicOptions {
                max_capacity: 64,
                growth_factor: 4,
            },
        );
        assert_eq!(explicit.max_capacity(), 64);
        assert_eq!(explicit.capacity(), 16);
    }

    #[test]
    fn zero_max_capacity_means_not_growable() {
        let queue: Dynamic<i32> = Dynamic::with_options(2, DynamicOptions::default());
        assert_eq!(queue.max_capacity(), 2);
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        assert!(queue.try_push(3).unwrap_err().is_full());
    }

    #[test]
    fn closed_array_schedule_is_bounded() {
        assert_eq!(max_closed_arrays(2, 2, 2), 0);
        assert_eq!(max_closed_arrays(2, 8, 2), 2);
        assert_eq!(max_closed_arrays(2, 9, 2), 3);
        assert_eq!(max_closed_arrays(10, 64, 10), 1);
    }

    #[test]
    fn grows_to_ceiling_without_losing_values() {
        let queue = Dynamic::with_options(
            2,
            DynamicOptions {
                max_capacity: 8,
                growth_factor: 2,
            },
        );

        let mut seen = vec![false; 8];
        let mut forced_pops = 0;
        for value in 0..8usize {
            let mut pending = queue.try_push(value);
            while let Err(full) = pending {
                assert!(full.is_full());
                // Make room the way a slow consumer would.
                let popped = queue.try_pop().unwrap();
                assert!(!seen[popped]);
                seen[popped] = true;
                forced_pops += 1;
                pending = queue.try_push(full.into_inner());
            }
        }

        assert!(forced_pops > 0);
        assert_eq!(queue.capacity(), 8);
        assert_eq!(queue.allocated_capacity(), 8);
        assert_eq!(queue.max_capacity(), 8);
        assert!(!queue.is_empty());
        assert!(queue.size_guess() >= 0);

        loop {
            match queue.try_pop() {
                Ok(popped) => {
                    assert!(!seen[popped]);
                    seen[popped] = true;
                }
                Err(err) => {
                    assert_eq!(err, ErrorKind::QueueEmpty);
                    break;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(queue.write_count(), 8);
        assert_eq!(queue.read_count(), 8);
    }

    #[test]
    fn in_flight_tickets_survive_growth_in_order() {
        let queue = Dynamic::with_options(
            2,
            DynamicOptions {
                max_capacity: 8,
                growth_factor: 2,
            },
        );

        queue.try_push(0).unwrap();
        queue.try_push(1).unwrap();
        // Full; the failed push retires the first array even though the
        // push itself still reports full until a pop frees its slot.
        assert!(queue.try_push(2).unwrap_err().is_full());
        assert_eq!(queue.capacity(), 4);

        assert_eq!(queue.try_pop().unwrap(), 0);
        assert_eq!(queue.try_pop().unwrap(), 1);

        for value in 2..6 {
            queue.try_push(value).unwrap();
        }
        for expected in 2..6 {
            assert_eq!(queue.try_pop().unwrap(), expected);
        }
        assert_eq!(queue.try_pop().unwrap_err(), ErrorKind::QueueEmpty);
    }

    #[test]
    fn drops_values_across_closed_arrays() {
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        struct Counted(#[allow(dead_code)] usize, Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.1.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let queue = Dynamic::with_options(
                2,
                DynamicOptions {
                    max_capacity: 8,
                    growth_factor: 2,
                },
            );
            let mut stored = 0;
            for value in 0..6usize {
                if queue.try_push(Counted(value, drops.clone())).is_ok() {
                    stored += 1;
                }
            }
            assert_eq!(drops.load(Ordering::SeqCst), 6 - stored);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn contended_growth_keeps_uniqueness() {
        use std::collections::HashSet;
        use std::sync::{Arc, Mutex};

        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 64;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let queue = Arc::new(Dynamic::with_options(
            4,
            DynamicOptions {
                max_capacity: 128,
                growth_factor: 2,
            },
        ));

        let mut producers = Vec::new();
        for producer in 0..PRODUCERS {
            let queue = queue.clone();
            producers.push(std::thread::spawn(move || {
                for sequence in 0..PER_PRODUCER {
                    let mut item = producer * PER_PRODUCER + sequence;
                    loop {
                        match queue.try_push(item) {
                            Ok(()) => break,
                            Err(full) => {
                                item = full.into_inner();
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let seen = Arc::new(Mutex::new(HashSet::new()));
        let consumer = {
            let queue = queue.clone();
            let seen = seen.clone();
            std::thread::spawn(move || loop {
                {
                    let seen = seen.lock().unwrap();
                    if seen.len() == TOTAL {
                        break;
                    }
                }
                if let Ok(value) = queue.try_pop() {
                    assert!(seen.lock().unwrap().insert(value));
                } else {
                    std::thread::yield_now();
                }
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        consumer.join().unwrap();

        assert_eq!(seen.lock().unwrap().len(), TOTAL);
        assert_eq!(queue.push_count(), TOTAL as u64);
        assert_eq!(queue.pop_count(), TOTAL as u64);
        assert!(queue.capacity() <= queue.max_capacity());
    }
}
