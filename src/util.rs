use crate::loom;
use core::{
    fmt,
    ops::{Deref, DerefMut},
};

pub(crate) mod panic;

#[cfg_attr(any(target_arch = "x86_64", target_arch = "aarch64"), repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
pub(crate) struct CachePadded<T>(pub(crate) T);

/// The cacheline size assumed when padding slot arrays and wait channels.
pub(crate) const CACHELINE: usize =
    if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
        128
    } else {
        64
    };

/// One iteration of a bounded spin wait.
#[inline(always)]
pub(crate) fn spin_pause() {
    loom::hint::spin_loop();
}

// === impl CachePadded ===

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
