//! Turn-stamped storage slots and the ticket arithmetic shared by both ring
//! flavors.
//!
//! A slot's `turn` word encodes ownership: an even value `2k` means the slot
//! is empty and waiting for the `k`-th producer round, `2k + 1` means it is
//! full and waiting for the `k`-th consumer round. Because turns only ever
//! increase, a stale ticket that wrapped around the ring is rejected by a
//! simple turn comparison, with no tagged pointers or deferred reclamation.
use crate::{
    loom::{atomic::AtomicU64, UnsafeCell},
    util::CACHELINE,
};
use core::mem::MaybeUninit;

/// One ring slot: a turn word plus uninitialized storage for a value.
///
/// Slots are aligned to the cacheline so neighboring slots never share a
/// line; the stride (see [`compute_stride`]) additionally spreads successive
/// tickets across distant slots.
#[cfg_attr(any(target_arch = "x86_64", target_arch = "aarch64"), repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
pub(crate) struct Slot<T> {
    pub(crate) turn: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    /// Front and back padding, in slots, isolating the boundary slots from
    /// whatever the allocator places next to the array.
    pub(crate) const PADDING: usize = (CACHELINE - 1) / core::mem::size_of::<Slot<T>>() + 1;

    #[cfg(not(loom))]
    const fn empty() -> Self {
        Self {
            turn: AtomicU64::new(0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[cfg(loom)]
    fn empty() -> Self {
        Self {
            turn: AtomicU64::new(0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Moves `value` into the slot.
    ///
    /// # Safety
    ///
    /// The caller must hold the slot's current turn (it claimed the ticket
    /// mapping to this slot), and the slot must be empty.
    #[inline]
    pub(crate) unsafe fn write(&self, value: T) {
        self.value.with_mut(|ptr| unsafe {
            (*ptr).write(value);
        });
    }

    /// Moves the value out of the slot, leaving it uninitialized.
    ///
    /// # Safety
    ///
    /// The caller must hold the slot's current turn, and the slot must be
    /// full (odd turn).
    #[inline]
    pub(crate) unsafe fn take(&self) -> T {
        self.value.with_mut(|ptr| unsafe { (*ptr).as_ptr().read() })
    }

    /// Total array length for a ring of `capacity` slots, including padding.
    #[inline]
    pub(crate) fn array_len(capacity: usize) -> usize {
        capacity + 2 * Self::PADDING
    }

    /// Allocates a padded, zero-turn slot array as a boxed slice.
    pub(crate) fn make_boxed_array(capacity: usize) -> Box<[Slot<T>]> {
        (0..Self::array_len(capacity))
            .map(|_| Slot::empty())
            .collect()
    }

    /// Allocates a padded slot array and leaks it to a thin pointer, for the
    /// growable ring's atomically-swapped arrays. Release with
    /// [`free_raw_array`].
    pub(crate) fn alloc_raw_array(capacity: usize) -> *mut Slot<T> {
        Box::into_raw(Self::make_boxed_array(capacity)) as *mut Slot<T>
    }
}

/// Reconstructs and drops an array previously created by
/// [`Slot::alloc_raw_array`].
///
/// # Safety
///
/// `ptr` must have come from `alloc_raw_array(capacity)` with the same
/// `capacity`, must not have been freed already, and no other thread may
/// still access the array.
pub(crate) unsafe fn free_raw_array<T>(ptr: *mut Slot<T>, capacity: usize) {
    let slice = core::ptr::slice_from_raw_parts_mut(ptr, Slot::<T>::array_len(capacity));
    drop(Box::from_raw(slice));
}

unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

/// Picks a small prime stride coprime to `capacity`, maximizing the minimum
/// circular distance between slots claimed by successive tickets. Falls back
/// to 1 when no listed prime qualifies.
pub(crate) fn compute_stride(capacity: usize) -> u64 {
    const SMALL_PRIMES: [u64; 9] = [2, 3, 5, 7, 11, 13, 17, 19, 23];

    let capacity = capacity as u64;
    let mut best_stride = 1;
    let mut best_separation = 1;

    for stride in SMALL_PRIMES {
        if stride % capacity == 0 || capacity % stride == 0 {
            continue;
        }

        let separation = (stride % capacity).min(capacity - (stride % capacity));
        if separation > best_separation {
            best_stride = stride;
            best_separation = separation;
        }
    }

    best_stride
}

/// Maps a ticket to its (unpadded) slot index.
#[inline]
pub(crate) fn ring_index(ticket: u64, capacity: usize, stride: u64) -> usize {
    let spread = ticket.wrapping_mul(stride);
    if capacity.is_power_of_two() {
        (spread & (capacity as u64 - 1)) as usize
    } else {
        (spread % capacity as u64) as usize
    }
}

/// The turn a producer must observe before writing the slot for `ticket`.
#[inline]
pub(crate) fn enqueue_turn(ticket: u64, capacity: usize) -> u64 {
    if capacity.is_power_of_two() {
        (ticket >> capacity.trailing_zeros()) << 1
    } else {
        (ticket / capacity as u64) * 2
    }
}

/// The turn a consumer must observe before reading the slot for `ticket`.
#[inline]
pub(crate) fn dequeue_turn(ticket: u64, capacity: usize) -> u64 {
    enqueue_turn(ticket, capacity) + 1
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn stride_is_coprime_to_capacity() {
        for capacity in 1..=64usize {
            let stride = compute_stride(capacity);
            assert_eq!(
                gcd(stride, capacity as u64),
                1,
                "stride {} shares a divisor with capacity {}",
                stride,
                capacity
            );
        }
    }

    #[test]
    fn stride_spreads_non_trivial_capacities() {
        // 10 slots: 3 is the listed prime with the best circular separation.
        assert_eq!(compute_stride(10), 3);
        // Tiny rings where no listed prime qualifies fall back to 1.
        assert_eq!(compute_stride(1), 1);
        assert_eq!(compute_stride(2), 1);
    }

    #[test]
    fn turns_advance_two_per_lap() {
        for &capacity in &[1usize, 3, 4, 7, 8] {
            for ticket in 0..4 * capacity as u64 {
                let lap = ticket / capacity as u64;
                assert_eq!(enqueue_turn(ticket, capacity), 2 * lap);
                assert_eq!(dequeue_turn(ticket, capacity), 2 * lap + 1);
            }
        }
    }

    #[test]
    fn ring_index_visits_every_slot_each_lap() {
        for &capacity in &[2usize, 4, 5, 10, 16] {
            let stride = compute_stride(capacity);
            let mut seen = vec![false; capacity];
            for ticket in 0..capacity as u64 {
                let idx = ring_index(ticket, capacity, stride);
                assert!(!seen[idx], "ticket {} revisited slot {}", ticket, idx);
                seen[idx] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    fn gcd(a: u64, b: u64) -> u64 {
        if b == 0 {
            a
        } else {
            gcd(b, a % b)
        }
    }
}
