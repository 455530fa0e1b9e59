//! Turn-indexed lock-free MPMC queues with parked-waiter wakeups.
//!
//! `turnbuf` provides the queue core of a concurrent execution stack:
//!
//! - [`Bounded`]: a fixed-capacity multi-producer multi-consumer FIFO ring.
//!   Every slot carries a monotonically increasing *turn* counter, so the
//!   lock-free fast path needs no tagged pointers and no deferred
//!   reclamation.
//! - [`Dynamic`]: the same ring with seqlock-guarded growth up to a fixed
//!   ceiling. Retired arrays stay alive so in-flight tickets remain valid.
//! - An async facade ([`Queue::push`], [`Queue::pop`], and the
//!   [`push_until`](Queue::push_until)/[`pop_until`](Queue::pop_until)
//!   deadline variants): lazy futures that spin briefly, then park on the
//!   exact slot turn they need in a hashed wait-channel registry and are
//!   woken precisely when that turn is published.
//! - [`Channel`]: a closable channel over the bounded ring. Closing is a
//!   one-shot event that wakes every parked producer and consumer; buffered
//!   values still drain before [`ErrorKind::ChannelClosed`] is reported.
//!
//! # Example
//!
//! ```
//! use turnbuf::{Bounded, ErrorKind};
//!
//! let queue = Bounded::new(4);
//! queue.try_push(1).unwrap();
//! queue.try_push(2).unwrap();
//! assert_eq!(queue.try_pop().unwrap(), 1);
//! assert_eq!(queue.try_pop().unwrap(), 2);
//! assert_eq!(queue.try_pop().unwrap_err(), ErrorKind::QueueEmpty);
//! ```
//!
//! Async operations integrate with any executor; cancellation is
//! cooperative via [`StopSource`]/[`StopToken`], and the deadline variants
//! take a [`TimedSchedulerContext`] so the core never owns a timer of its
//! own.
#[macro_use]
mod macros;

mod bounded;
mod channel;
mod dynamic;
mod error;
mod future;
mod loom;
mod notify;
mod scheduler;
mod slot;
mod stop;
mod util;

pub use bounded::Bounded;
pub use channel::{
    channel, Channel, ChannelPop, ChannelPopUntil, ChannelPush, ChannelPushUntil, Receiver, Sender,
};
pub use dynamic::{Dynamic, DynamicOptions};
pub use error::{ErrorKind, Outcome, TryPushError};
pub use future::{pop_detached, push_detached, Deadline, Pop, PopUntil, Push, PushUntil, Queue};
pub use scheduler::{SchedulerContext, TimedSchedulerContext};
pub use stop::{StopSource, StopToken};
