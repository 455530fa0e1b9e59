//! Shared helpers for the integration tests: a tokio-backed scheduler
//! context for the deadline and detached (callback) operations.
#![allow(dead_code)]

use std::{future::Future, time::Duration};
use turnbuf::{SchedulerContext, TimedSchedulerContext};

#[derive(Clone)]
pub struct TokioContext {
    handle: tokio::runtime::Handle,
}

impl TokioContext {
    /// Captures the current tokio runtime.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl SchedulerContext for TokioContext {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

impl TimedSchedulerContext for TokioContext {
    type Instant = tokio::time::Instant;
    type Sleep = tokio::time::Sleep;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep_until(&self, deadline: Self::Instant) -> Self::Sleep {
        tokio::time::sleep_until(deadline)
    }

    fn sleep_after(&self, duration: Duration) -> Self::Sleep {
        tokio::time::sleep(duration)
    }
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
