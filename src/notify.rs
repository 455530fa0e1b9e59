//! Hashed wait-channel registry.
//!
//! Producers and consumers that lose the lock-free race park here, keyed on
//! the exact turn word and turn value they are waiting for. A [`Notify`]
//! owns a fixed, power-of-two table of *wait channels*; each channel holds
//! an intrusive doubly-linked list of waiters sharing one
//! `(turn_ptr, expected_turn)` key. [`Notify::arm`] finds (or claims) the
//! channel for a waiter's key by hashed linear probing, [`Notify::notify`]
//! detaches a channel's whole list and invokes each waiter's callback
//! outside the channel lock, and [`Notify::disarm`] removes one waiter and
//! synchronizes with any in-flight wakeup so the waiter's memory can be
//! reclaimed the moment it returns.
//!
//! Fairness within a channel is deliberately LIFO (insert at head, walk from
//! head); across channels nothing is promised.
use crate::{
    loom::{
        atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering::*},
        UnsafeCell,
    },
    util::{spin_pause, CachePadded},
};
use core::{fmt, marker::PhantomPinned, pin::Pin, ptr};

/// Sentinel for "this waiter is not in any channel".
pub(crate) const INVALID_CHANNEL_INDEX: u16 = u16::MAX;

#[cfg(not(loom))]
const WAIT_CHANNEL_COUNT: usize = 1024;
#[cfg(loom)]
const WAIT_CHANNEL_COUNT: usize = 8;

#[cfg(not(loom))]
const MIN_PROBE_WINDOW: usize = 8;
#[cfg(loom)]
const MIN_PROBE_WINDOW: usize = 2;

#[cfg(not(loom))]
const MAX_PROBE_WINDOW: usize = 256;
#[cfg(loom)]
const MAX_PROBE_WINDOW: usize = 8;

#[cfg(not(loom))]
const INITIAL_PROBE_WINDOW: usize = 16;
#[cfg(loom)]
const INITIAL_PROBE_WINDOW: usize = 2;

const _: () = assert!(WAIT_CHANNEL_COUNT.is_power_of_two());
const _: () = assert!(WAIT_CHANNEL_COUNT <= u16::MAX as usize);

/// Everything a waiter needs to know about the turn it is about to park on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitRegistration {
    pub(crate) turn_ptr: *const AtomicU64,
    pub(crate) expected_turn: u64,
    pub(crate) channel_hint: u16,
}

/// Callback invoked when a waiter's turn is published. Receives the opaque
/// owner pointer and the waiter itself; runs on the notifying thread with no
/// channel lock held.
pub(crate) type NotifyFn = unsafe fn(*const (), *const Waiter);

/// Intrusively-linked parked operation.
///
/// The waiter is owned by the operation state (a future) that parks on it;
/// the registry only ever holds it by raw pointer. The `notifying` flag is
/// the reclamation handshake: `disarm` spins on it, so once `disarm`
/// returns, no waker thread still touches this memory.
pub(crate) struct Waiter {
    /// Non-atomic fields: written by the owner while unlinked, by the
    /// registry under the owning channel's lock, and read by the notifier
    /// during the armed→notifying handoff.
    state: UnsafeCell<WaiterState>,
    armed: AtomicBool,
    linked: AtomicBool,
    notifying: AtomicBool,
    channel_index: AtomicU16,
    _pin: PhantomPinned,
}

struct WaiterState {
    turn_ptr: *const AtomicU64,
    expected_turn: u64,
    next: *mut Waiter,
    prev: *mut Waiter,
    owner: *const (),
    notify: Option<NotifyFn>,
    channel_hint: u16,
}

/// One bucket of the registry table.
///
/// `key_tag` doubles as the occupancy marker (zero means free) and as a
/// cheap pre-lock filter; the remaining fields are guarded by `lock`.
struct WaitChannel {
    lock: AtomicBool,
    key_tag: AtomicU64,
    state: UnsafeCell<ChannelState>,
}

struct ChannelState {
    turn_ptr: *const AtomicU64,
    expected_turn: u64,
    head: *mut Waiter,
    size: usize,
}

/// The registry itself. See the module docs.
pub(crate) struct Notify {
    occupied_channels: AtomicU32,
    probe_window: AtomicUsize,
    channels: Box<[CachePadded<WaitChannel>]>,
}

// === impl Waiter ===

impl Waiter {
    pub(crate) fn new() -> Self {
        Self {
            state: UnsafeCell::new(WaiterState {
                turn_ptr: ptr::null(),
                expected_turn: 0,
                next: ptr::null_mut(),
                prev: ptr::null_mut(),
                owner: ptr::null(),
                notify: None,
                channel_hint: INVALID_CHANNEL_INDEX,
            }),
            armed: AtomicBool::new(false),
            linked: AtomicBool::new(false),
            notifying: AtomicBool::new(false),
            channel_index: AtomicU16::new(INVALID_CHANNEL_INDEX),
            _pin: PhantomPinned,
        }
    }

    /// Fills in the registration before an [`arm`](Notify::arm) attempt.
    ///
    /// The waiter must not currently be linked into any channel.
    pub(crate) fn prepare(
        self: Pin<&mut Self>,
        registration: WaitRegistration,
        owner: *const (),
        notify: NotifyFn,
    ) {
        debug_assert!(!self.linked.load(Relaxed));
        // Safety: the waiter is unlinked, so the owner has exclusive access
        // to the state cell.
        let this = unsafe { self.get_unchecked_mut() };
        this.state.with_mut(|state| {
            let state = unsafe { &mut *state };
            state.turn_ptr = registration.turn_ptr;
            state.expected_turn = registration.expected_turn;
            state.channel_hint = registration.channel_hint;
            state.owner = owner;
            state.notify = Some(notify);
            state.next = ptr::null_mut();
            state.prev = ptr::null_mut();
        });
        this.channel_index.store(INVALID_CHANNEL_INDEX, Relaxed);
    }

    /// # Safety
    ///
    /// The caller must have exclusive access to the waiter's non-atomic
    /// state per the protocol in the field docs.
    #[inline]
    unsafe fn with_state<R>(&self, f: impl FnOnce(&mut WaiterState) -> R) -> R {
        self.state.with_mut(|state| f(unsafe { &mut *state }))
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("armed", &self.armed.load(Relaxed))
            .field("linked", &self.linked.load(Relaxed))
            .field("notifying", &self.notifying.load(Relaxed))
            .field("channel_index", &self.channel_index.load(Relaxed))
            .finish()
    }
}

unsafe impl Send for Waiter {}
unsafe impl Sync for Waiter {}

// === impl WaitChannel ===

impl WaitChannel {
    fn new() -> Self {
        Self {
            lock: AtomicBool::new(false),
            key_tag: AtomicU64::new(0),
            state: UnsafeCell::new(ChannelState {
                turn_ptr: ptr::null(),
                expected_turn: 0,
                head: ptr::null_mut(),
                size: 0,
            }),
        }
    }

    #[inline]
    fn lock(&self) {
        while self.lock.swap(true, Acquire) {
            spin_pause();
        }
    }

    #[inline]
    fn unlock(&self) {
        self.lock.store(false, Release);
    }

    /// # Safety
    ///
    /// The channel lock must be held.
    #[inline]
    unsafe fn with_state<R>(&self, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        self.state.with_mut(|state| f(unsafe { &mut *state }))
    }
}

unsafe impl Send for WaitChannel {}
unsafe impl Sync for WaitChannel {}

// === impl Notify ===

impl Notify {
    pub(crate) fn new() -> Self {
        Self {
            occupied_channels: AtomicU32::new(0),
            probe_window: AtomicUsize::new(INITIAL_PROBE_WINDOW),
            channels: (0..WAIT_CHANNEL_COUNT)
                .map(|_| CachePadded(WaitChannel::new()))
                .collect(),
        }
    }

    /// `true` if any channel currently holds at least one waiter. Approximate
    /// (relaxed), used to skip the notify probe entirely on the hot path.
    #[allow(dead_code)]
    pub(crate) fn has_waiters(&self) -> bool {
        self.occupied_channels.load(Relaxed) != 0
    }

    /// Suggests a starting channel for a key, so a waiter that re-arms for
    /// the same turn lands on its previous channel without probing.
    pub(crate) fn suggest_channel_index(turn_ptr: *const AtomicU64, expected_turn: u64) -> u16 {
        hash_key(turn_ptr, expected_turn) as u16
    }

    /// Parks `waiter` on its prepared `(turn_ptr, expected_turn)` key.
    ///
    /// Returns `false` without linking if the expected turn has already been
    /// reached (the caller should retry its operation instead of waiting).
    ///
    /// # Safety
    ///
    /// The waiter must have been [`prepare`](Waiter::prepare)d with a
    /// `turn_ptr` that stays valid, and must stay pinned and alive until
    /// either its callback has completed or [`disarm`](Notify::disarm)
    /// returns.
    pub(crate) unsafe fn arm(&self, waiter: Pin<&Waiter>) -> bool {
        let waiter: &Waiter = Pin::into_inner_unchecked(waiter);
        let (turn_ptr, expected_turn, channel_hint) =
            waiter.with_state(|state| (state.turn_ptr, state.expected_turn, state.channel_hint));
        debug_assert!(!turn_ptr.is_null());

        if turn_reached((*turn_ptr).load(Acquire), expected_turn) {
            return false;
        }

        let key_tag = mix_key(turn_ptr, expected_turn);
        let (channel, channel_index) =
            match self.find_or_reserve_channel(turn_ptr, expected_turn, key_tag, channel_hint) {
                Some(found) => found,
                None => return false,
            };

        if turn_reached((*turn_ptr).load(Acquire), expected_turn) {
            channel.with_state(|state| clear_channel_if_empty(channel, state));
            channel.unlock();
            return false;
        }

        waiter.notifying.store(false, Release);
        waiter.armed.store(true, Release);
        waiter.linked.store(true, Relaxed);
        waiter.channel_index.store(channel_index as u16, Relaxed);
        let waiter_ptr = waiter as *const Waiter as *mut Waiter;
        let was_empty = channel.with_state(|state| {
            // Safety: lock held; the waiter is not yet visible to anyone
            // else.
            unsafe {
                waiter.with_state(|wstate| {
                    wstate.prev = ptr::null_mut();
                    wstate.next = state.head;
                });
                if !state.head.is_null() {
                    (*state.head).with_state(|head| head.prev = waiter_ptr);
                }
            }
            let was_empty = state.size == 0;
            state.head = waiter_ptr;
            state.size += 1;
            was_empty
        });
        if was_empty {
            self.occupied_channels.fetch_add(1, Relaxed);
        }

        if turn_reached((*turn_ptr).load(Acquire), expected_turn) {
            waiter.armed.store(false, Release);
            channel.with_state(|state| {
                // Safety: lock held, waiter linked into this channel.
                unsafe { self.remove_waiter_from_channel(channel, state, waiter) }
            });
            channel.unlock();
            return false;
        }

        channel.unlock();
        test_println!("Notify::arm -> parked on channel {}", channel_index);
        true
    }

    /// Unregisters `waiter` and waits out any in-flight wakeup.
    ///
    /// After this returns, no notifier thread will touch the waiter again.
    ///
    /// # Safety
    ///
    /// The waiter must be one previously passed to [`arm`](Notify::arm) on
    /// this registry (or never armed at all, in which case this is a no-op).
    pub(crate) unsafe fn disarm(&self, waiter: Pin<&Waiter>) {
        let waiter: &Waiter = Pin::into_inner_unchecked(waiter);
        waiter.armed.store(false, Release);

        let channel_index = waiter.channel_index.load(Relaxed);
        if channel_index != INVALID_CHANNEL_INDEX {
            let channel = &*self.channels[channel_index as usize];
            channel.lock();
            if waiter.linked.load(Relaxed) {
                channel.with_state(|state| {
                    // Safety: lock held, waiter still linked here.
                    unsafe { self.remove_waiter_from_channel(channel, state, waiter) }
                });
            }
            channel.unlock();
        }

        while waiter.notifying.load(Acquire) {
            spin_pause();
        }
    }

    /// Wakes every waiter parked on `(turn_ptr, turn_value)`.
    ///
    /// The matching channel's list is detached in one motion under the
    /// channel lock; the callbacks run after the lock is released, so a
    /// callback may immediately re-arm (or drop) its waiter.
    pub(crate) fn notify(&self, turn_ptr: *const AtomicU64, turn_value: u64) {
        debug_assert!(!turn_ptr.is_null());

        let channel = match self.lock_existing_channel(turn_ptr, turn_value) {
            Some((channel, _)) => channel,
            None => return,
        };

        // Detach the whole list and clear the channel while holding the
        // lock; armed waiters are moved onto a local ready list with
        // `notifying` raised so `disarm` cannot release their memory yet.
        let mut ready: *mut Waiter = ptr::null_mut();
        // Safety: lock held; list nodes are valid until their owners observe
        // the armed→false transition or disarm.
        unsafe {
            channel.with_state(|state| {
                let mut list = state.head;
                let detached = state.size;
                state.head = ptr::null_mut();
                state.size = 0;
                state.turn_ptr = ptr::null();
                state.expected_turn = 0;
                channel.key_tag.store(0, Relaxed);
                if detached != 0 {
                    self.occupied_channels.fetch_sub(1, Relaxed);
                }

                while !list.is_null() {
                    let current = unsafe { &*list };
                    list = unsafe {
                        current.with_state(|wstate| {
                            let next = wstate.next;
                            wstate.next = ptr::null_mut();
                            wstate.prev = ptr::null_mut();
                            next
                        })
                    };
                    current.linked.store(false, Relaxed);
                    current.channel_index.store(INVALID_CHANNEL_INDEX, Relaxed);

                    if current.armed.swap(false, AcqRel) {
                        current.notifying.store(true, Release);
                        unsafe { current.with_state(|wstate| wstate.next = ready) };
                        ready = current as *const Waiter as *mut Waiter;
                    }
                }
            });
        }
        channel.unlock();

        while !ready.is_null() {
            // Safety: every waiter on the ready list has `notifying` set, so
            // its owner is blocked from freeing it until the store below.
            unsafe {
                let current = &*ready;
                let (next, owner, notify) = current.with_state(|wstate| {
                    let next = wstate.next;
                    wstate.next = ptr::null_mut();
                    (next, wstate.owner, wstate.notify)
                });
                ready = next;
                if let Some(notify) = notify {
                    notify(owner, current);
                }
                current.notifying.store(false, Release);
            }
        }
    }

    fn probe_window(&self) -> usize {
        self.probe_window
            .load(Relaxed)
            .clamp(MIN_PROBE_WINDOW, MAX_PROBE_WINDOW)
    }

    fn maybe_grow_probe_window(&self, current: usize) {
        if current >= MAX_PROBE_WINDOW {
            return;
        }
        let widened = (current * 2).min(MAX_PROBE_WINDOW);
        tracing::trace!(current, widened, "widening wait-channel probe window");
        let _ = self
            .probe_window
            .compare_exchange_weak(current, widened, Relaxed, Relaxed);
    }

    /// Probes `span` channels from `start` for one whose key matches, and
    /// locks it.
    fn lock_matching_channel(
        &self,
        turn_ptr: *const AtomicU64,
        expected_turn: u64,
        key_tag: u64,
        start: usize,
        span: usize,
    ) -> Option<(&WaitChannel, usize)> {
        for offset in 0..span {
            let index = (start + offset) & (WAIT_CHANNEL_COUNT - 1);
            let channel = &*self.channels[index];
            if channel.key_tag.load(Relaxed) != key_tag {
                continue;
            }
            channel.lock();
            // Safety: lock held.
            let matched = unsafe {
                channel.with_state(|state| {
                    state.turn_ptr == turn_ptr && state.expected_turn == expected_turn
                })
            };
            if matched {
                return Some((channel, index));
            }
            channel.unlock();
        }
        None
    }

    /// Probes `span` channels from `start` for a free one, and locks it.
    fn lock_empty_channel(&self, start: usize, span: usize) -> Option<(&WaitChannel, usize)> {
        for offset in 0..span {
            let index = (start + offset) & (WAIT_CHANNEL_COUNT - 1);
            let channel = &*self.channels[index];
            if channel.key_tag.load(Relaxed) != 0 {
                continue;
            }
            channel.lock();
            // Safety: lock held.
            let free = unsafe { channel.with_state(|state| state.size == 0) }
                && channel.key_tag.load(Relaxed) == 0;
            if free {
                return Some((channel, index));
            }
            channel.unlock();
        }
        None
    }

    /// Tries the waiter's hint channel before any probing: reusable if it is
    /// free or already keyed identically.
    fn lock_channel_by_hint(&self, hint: u16, key_tag: u64) -> Option<(&WaitChannel, usize)> {
        if hint == INVALID_CHANNEL_INDEX {
            return None;
        }
        let index = (hint as usize) & (WAIT_CHANNEL_COUNT - 1);
        let channel = &*self.channels[index];
        let observed_tag = channel.key_tag.load(Relaxed);
        if observed_tag != 0 && observed_tag != key_tag {
            return None;
        }
        channel.lock();
        Some((channel, index))
    }

    fn lock_existing_channel(
        &self,
        turn_ptr: *const AtomicU64,
        expected_turn: u64,
    ) -> Option<(&WaitChannel, usize)> {
        let key_tag = mix_key(turn_ptr, expected_turn);
        let start = hash_key(turn_ptr, expected_turn);
        let span = self.probe_window();

        if let Some(found) =
            self.lock_matching_channel(turn_ptr, expected_turn, key_tag, start, span)
        {
            return Some(found);
        }
        self.lock_matching_channel(turn_ptr, expected_turn, key_tag, start, WAIT_CHANNEL_COUNT)
    }

    /// Finds the channel for `key_tag`, claiming an empty one if no channel
    /// holds the key yet. Returns with the channel locked, or `None` if the
    /// entire table is keyed to other turns.
    fn find_or_reserve_channel(
        &self,
        turn_ptr: *const AtomicU64,
        expected_turn: u64,
        key_tag: u64,
        hint: u16,
    ) -> Option<(&WaitChannel, usize)> {
        if let Some((channel, index)) = self.lock_channel_by_hint(hint, key_tag) {
            // Safety: lock held.
            let claimed = unsafe {
                channel.with_state(|state| {
                    if state.turn_ptr == turn_ptr && state.expected_turn == expected_turn {
                        return true;
                    }
                    if state.size == 0 {
                        state.turn_ptr = turn_ptr;
                        state.expected_turn = expected_turn;
                        channel.key_tag.store(key_tag, Relaxed);
                        return true;
                    }
                    false
                })
            };
            if claimed {
                return Some((channel, index));
            }
            channel.unlock();
        }

        let start = hash_key(turn_ptr, expected_turn);
        for _attempt in 0..3 {
            let span = self.probe_window();

            if let Some(found) =
                self.lock_matching_channel(turn_ptr, expected_turn, key_tag, start, span)
            {
                return Some(found);
            }
            if let Some((channel, index)) = self.lock_empty_channel(start, span) {
                self.claim_locked_channel(channel, turn_ptr, expected_turn, key_tag);
                return Some((channel, index));
            }
            self.maybe_grow_probe_window(span);
        }

        tracing::trace!("wait-channel probe fell back to a full-table scan");
        if let Some(found) =
            self.lock_matching_channel(turn_ptr, expected_turn, key_tag, start, WAIT_CHANNEL_COUNT)
        {
            return Some(found);
        }
        if let Some((channel, index)) = self.lock_empty_channel(start, WAIT_CHANNEL_COUNT) {
            self.claim_locked_channel(channel, turn_ptr, expected_turn, key_tag);
            return Some((channel, index));
        }
        None
    }

    fn claim_locked_channel(
        &self,
        channel: &WaitChannel,
        turn_ptr: *const AtomicU64,
        expected_turn: u64,
        key_tag: u64,
    ) {
        // Safety: lock held.
        unsafe {
            channel.with_state(|state| {
                state.turn_ptr = turn_ptr;
                state.expected_turn = expected_turn;
            });
        }
        channel.key_tag.store(key_tag, Relaxed);
    }

    /// Unlinks `waiter` from `channel`.
    ///
    /// # Safety
    ///
    /// The channel lock must be held and the waiter must be linked into this
    /// channel.
    unsafe fn remove_waiter_from_channel(
        &self,
        channel: &WaitChannel,
        state: &mut ChannelState,
        waiter: &Waiter,
    ) {
        if !waiter.linked.load(Relaxed) {
            return;
        }

        let (prev, next) = waiter.with_state(|wstate| {
            let links = (wstate.prev, wstate.next);
            wstate.next = ptr::null_mut();
            wstate.prev = ptr::null_mut();
            links
        });

        if !prev.is_null() {
            (*prev).with_state(|p| p.next = next);
        } else {
            state.head = next;
        }
        if !next.is_null() {
            (*next).with_state(|n| n.prev = prev);
        }

        waiter.linked.store(false, Relaxed);
        waiter.channel_index.store(INVALID_CHANNEL_INDEX, Relaxed);
        if state.size > 0 {
            state.size -= 1;
            if state.size == 0 {
                self.occupied_channels.fetch_sub(1, Relaxed);
            }
        }
        clear_channel_if_empty(channel, state);
    }
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notify")
            .field("occupied_channels", &self.occupied_channels.load(Relaxed))
            .field("probe_window", &self.probe_window.load(Relaxed))
            .finish()
    }
}

unsafe impl Send for Notify {}
unsafe impl Sync for Notify {}

/// Signed 64-bit comparison, so waiters registered just before a turn wraps
/// are still considered satisfied.
#[inline]
fn turn_reached(current_turn: u64, expected_turn: u64) -> bool {
    current_turn.wrapping_sub(expected_turn) as i64 >= 0
}

/// Mixes the turn word address and expected value into a non-zero tag; the
/// low bit is forced on so `0` always means "channel free".
fn mix_key(turn_ptr: *const AtomicU64, expected_turn: u64) -> u64 {
    let mut mixed = (turn_ptr as usize as u64) >> 6;
    mixed ^= expected_turn
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(mixed << 6)
        .wrapping_add(mixed >> 2);
    mixed ^= mixed >> 30;
    mixed = mixed.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    mixed ^= mixed >> 27;
    mixed = mixed.wrapping_mul(0x94d0_49bb_1331_11eb);
    mixed ^= mixed >> 31;
    mixed | 1
}

fn hash_key(turn_ptr: *const AtomicU64, expected_turn: u64) -> usize {
    mix_key(turn_ptr, expected_turn) as usize & (WAIT_CHANNEL_COUNT - 1)
}

/// Resets a channel's key when its list has drained, making it claimable by
/// other keys. Lock must be held.
fn clear_channel_if_empty(channel: &WaitChannel, state: &mut ChannelState) {
    if state.size == 0 {
        state.head = ptr::null_mut();
        state.turn_ptr = ptr::null();
        state.expected_turn = 0;
        channel.key_tag.store(0, Relaxed);
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::pin::pin;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    unsafe fn count_wake(owner: *const (), _waiter: *const Waiter) {
        let count = &*(owner as *const StdAtomicUsize);
        count.fetch_add(1, SeqCst);
    }

    fn registration(turn: &AtomicU64, expected_turn: u64) -> WaitRegistration {
        WaitRegistration {
            turn_ptr: turn as *const AtomicU64,
            expected_turn,
            channel_hint: Notify::suggest_channel_index(turn as *const AtomicU64, expected_turn),
        }
    }

    #[test]
    fn rejects_stale_turn_registration() {
        let notify = Notify::new();
        let turn = AtomicU64::new(4);
        let woken = StdAtomicUsize::new(0);

        let mut waiter = pin!(Waiter::new());
        waiter.as_mut().prepare(
            registration(&turn, 3),
            &woken as *const _ as *const (),
            count_wake,
        );

        assert!(!unsafe { notify.arm(waiter.as_ref()) });
        assert_eq!(woken.load(SeqCst), 0);
        assert!(!notify.has_waiters());
    }

    #[test]
    fn wakes_waiter_at_expected_turn() {
        let notify = Notify::new();
        let turn = AtomicU64::new(6);
        let woken = StdAtomicUsize::new(0);

        let mut waiter = pin!(Waiter::new());
        waiter.as_mut().prepare(
            registration(&turn, 7),
            &woken as *const _ as *const (),
            count_wake,
        );

        assert!(unsafe { notify.arm(waiter.as_ref()) });
        assert!(notify.has_waiters());

        turn.store(7, Release);
        notify.notify(&turn as *const AtomicU64, 7);
        assert_eq!(woken.load(SeqCst), 1);
        assert!(!notify.has_waiters());

        // A second notify for the same turn finds nothing to wake.
        notify.notify(&turn as *const AtomicU64, 7);
        assert_eq!(woken.load(SeqCst), 1);

        unsafe { notify.disarm(waiter.as_ref()) };
    }

    #[test]
    fn notify_only_wakes_matching_turn() {
        let notify = Notify::new();
        let turn_a = AtomicU64::new(0);
        let turn_b = AtomicU64::new(0);
        let woken_a = StdAtomicUsize::new(0);
        let woken_b = StdAtomicUsize::new(0);

        let mut waiter_a = pin!(Waiter::new());
        waiter_a.as_mut().prepare(
            registration(&turn_a, 1),
            &woken_a as *const _ as *const (),
            count_wake,
        );
        let mut waiter_b = pin!(Waiter::new());
        waiter_b.as_mut().prepare(
            registration(&turn_b, 1),
            &woken_b as *const _ as *const (),
            count_wake,
        );

        assert!(unsafe { notify.arm(waiter_a.as_ref()) });
        assert!(unsafe { notify.arm(waiter_b.as_ref()) });

        turn_b.store(1, Release);
        notify.notify(&turn_b as *const AtomicU64, 1);
        assert_eq!(woken_a.load(SeqCst), 0);
        assert_eq!(woken_b.load(SeqCst), 1);

        unsafe {
            notify.disarm(waiter_a.as_ref());
            notify.disarm(waiter_b.as_ref());
        }
        assert!(!notify.has_waiters());
    }

    #[test]
    fn waiters_sharing_a_turn_share_a_channel_and_all_wake() {
        let notify = Notify::new();
        let turn = AtomicU64::new(2);
        let woken = StdAtomicUsize::new(0);

        let mut waiters = Vec::new();
        for _ in 0..4 {
            waiters.push(Box::pin(Waiter::new()));
        }
        for waiter in &mut waiters {
            waiter.as_mut().prepare(
                registration(&turn, 3),
                &woken as *const _ as *const (),
                count_wake,
            );
            assert!(unsafe { notify.arm(waiter.as_ref()) });
        }
        // All four share one key, so exactly one channel is occupied.
        assert_eq!(notify.occupied_channels.load(Relaxed), 1);

        turn.store(3, Release);
        notify.notify(&turn as *const AtomicU64, 3);
        assert_eq!(woken.load(SeqCst), 4);

        for waiter in &waiters {
            unsafe { notify.disarm(waiter.as_ref()) };
        }
    }

    #[test]
    fn disarm_unlinks_without_wake() {
        let notify = Notify::new();
        let turn = AtomicU64::new(0);
        let woken = StdAtomicUsize::new(0);

        let mut waiter = pin!(Waiter::new());
        waiter.as_mut().prepare(
            registration(&turn, 1),
            &woken as *const _ as *const (),
            count_wake,
        );
        assert!(unsafe { notify.arm(waiter.as_ref()) });
        unsafe { notify.disarm(waiter.as_ref()) };
        assert!(!notify.has_waiters());

        turn.store(1, Release);
        notify.notify(&turn as *const AtomicU64, 1);
        assert_eq!(woken.load(SeqCst), 0);
    }
}

#[cfg(all(loom, test))]
mod loom_tests {
    use super::*;
    use crate::loom::{self, sync::Arc, thread};
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    unsafe fn count_wake(owner: *const (), _waiter: *const Waiter) {
        let count = &*(owner as *const StdAtomicUsize);
        count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    // An armed waiter may be disarmed (and its memory released) while a
    // publisher is notifying the same turn concurrently. The `notifying`
    // handshake must keep the waiter alive until the wake has fully
    // finished, and the wake must be delivered at most once.
    #[test]
    fn notify_races_with_disarm() {
        loom::model(|| {
            let notify = Arc::new(Notify::new());
            let turn = Arc::new(AtomicU64::new(0));
            let woken = Arc::new(StdAtomicUsize::new(0));

            let mut waiter = Box::pin(Waiter::new());
            let turn_ptr = &*turn as *const AtomicU64;
            waiter.as_mut().prepare(
                WaitRegistration {
                    turn_ptr,
                    expected_turn: 1,
                    channel_hint: Notify::suggest_channel_index(turn_ptr, 1),
                },
                &*woken as *const _ as *const (),
                count_wake,
            );
            assert!(unsafe { notify.arm(waiter.as_ref()) });

            let publisher = {
                let notify = notify.clone();
                let turn = turn.clone();
                thread::spawn(move || {
                    turn.store(1, Release);
                    notify.notify(&*turn as *const AtomicU64, 1);
                })
            };

            unsafe { notify.disarm(waiter.as_ref()) };
            // After disarm returns, no waker thread may touch the waiter.
            drop(waiter);

            publisher.join().unwrap();
            assert!(woken.load(std::sync::atomic::Ordering::SeqCst) <= 1);
        });
    }
}
