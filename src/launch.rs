//! Bulk parallel kernel launching (Deep Fried Edition)
//!
//! Every fusion kernel is a parallel map over a flat workload index space
//! `[0, N)`. On the CPU target that map is a Rayon `par_iter`; the helpers
//! here cover the two shared-state patterns the kernels need on top of it:
//!
//! - [`ScatterBuffer`]: compacted output writes at atomically assigned
//!   indices (fetch-add counters hand every workload a distinct slot).
//! - [`atomic_min_f32`] / [`atomic_max_f32`]: float min/max folded through
//!   compare-and-swap on the `u32` bit pattern, for platforms (and Rust)
//!   without a native float atomic.
//!
//! Author: Moroya Sakamoto

use rayon::prelude::*;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

/// Run `op` for every workload index in `[0, n)`.
///
/// Ordering between workloads is unspecified; `op` must only touch shared
/// state through atomics or a [`ScatterBuffer`].
#[inline]
pub(crate) fn launch<F>(n: usize, op: F)
where
    F: Fn(usize) + Send + Sync,
{
    (0..n).into_par_iter().for_each(|i| op(i));
}

/// Shared output buffer for compacting kernels.
///
/// Workloads obtain distinct slots from an atomic counter and write them
/// concurrently. The writes themselves need no synchronization because no
/// two workloads ever receive the same index.
///
/// Callers must uphold exactly that: **every index is written by at most
/// one workload**. Bounds are always checked.
pub(crate) struct ScatterBuffer<'a, T> {
    ptr: *mut T,
    len: usize,
    _lifetime: PhantomData<&'a mut [T]>,
}

// One workload per index (the ScatterBuffer contract) means no two threads
// alias the same element.
unsafe impl<T: Send> Send for ScatterBuffer<'_, T> {}
unsafe impl<T: Send> Sync for ScatterBuffer<'_, T> {}

impl<'a, T> ScatterBuffer<'a, T> {
    /// Wrap a mutable slice for scatter writes.
    pub fn new(slice: &'a mut [T]) -> Self {
        ScatterBuffer {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _lifetime: PhantomData,
        }
    }

    /// Write `value` into slot `idx`.
    #[inline(always)]
    pub fn write(&self, idx: usize, value: T) {
        assert!(idx < self.len, "scatter write out of bounds");
        // Slot ownership is exclusive per the type contract; the bounds
        // check above keeps the pointer arithmetic in range.
        unsafe { self.ptr.add(idx).write(value) };
    }
}

/// Atomically fold `value` into `slot` keeping the minimum.
#[inline(always)]
pub(crate) fn atomic_min_f32(slot: &AtomicU32, value: f32) {
    let mut current = slot.load(Ordering::Relaxed);
    while value < f32::from_bits(current) {
        match slot.compare_exchange_weak(
            current,
            value.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Atomically fold `value` into `slot` keeping the maximum.
#[inline(always)]
pub(crate) fn atomic_max_f32(slot: &AtomicU32, value: f32) {
    let mut current = slot.load(Ordering::Relaxed);
    while value > f32::from_bits(current) {
        match slot.compare_exchange_weak(
            current,
            value.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}
