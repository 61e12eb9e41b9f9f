//! Per-worker storage.
//!
//! The bulk algorithms keep one scratch slot per rayon worker (spare
//! leaves, per-thread update/minima/candidate buffers). A slot is only
//! ever touched by the worker it belongs to while tasks run, and only by
//! the single caller holding `&mut` during the collection phase, so the
//! cells need no locks. Slots are cache-line aligned so neighboring
//! workers do not false-share.

use std::cell::UnsafeCell;

/// One cache line per worker slot.
#[repr(align(64))]
struct WorkerSlot<T>(UnsafeCell<T>);

/// A fixed array of per-worker values, indexed by the rayon worker id.
///
/// One extra slot backs callers running outside the pool (the thread that
/// owns the tree). Sized at construction from the ambient pool; using the
/// structure from a larger pool than it was built under is a contract
/// violation and asserted.
pub(crate) struct PerWorker<T> {
    slots: Box<[WorkerSlot<T>]>,
}

// SAFETY: a slot is accessed mutably only by its owning worker between two
// fork/join barriers (see `with_local`), or through `&mut self` accessors.
// `T` crossing threads this way needs `Send`, nothing more.
unsafe impl<T: Send> Sync for PerWorker<T> {}

impl<T> PerWorker<T> {
    /// One slot per worker of the ambient rayon pool, plus one for callers
    /// outside the pool.
    pub fn new(mut init: impl FnMut() -> T) -> Self {
        let workers = rayon::current_num_threads() + 1;
        let slots = (0..workers)
            .map(|_| WorkerSlot(UnsafeCell::new(init())))
            .collect();
        Self { slots }
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Slot index of the calling worker.
    #[inline]
    pub fn current_index(&self) -> usize {
        match rayon::current_thread_index() {
            Some(index) => {
                assert!(
                    index + 1 < self.slots.len(),
                    "used from a larger thread pool than it was created under"
                );
                index
            }
            None => self.slots.len() - 1,
        }
    }

    /// Run `f` on the calling worker's slot.
    ///
    /// `f` must not re-enter `with_local` on the same `PerWorker` and must
    /// not call into rayon (a stolen task could land on this worker and
    /// alias the slot). All call sites are straight-line merge or buffer
    /// code.
    #[inline]
    pub fn with_local<R>(&self, f: impl FnOnce(usize, &mut T) -> R) -> R {
        let index = self.current_index();
        // SAFETY: `index` is this worker's private slot; per the contract
        // above no other reference to it exists for the duration of `f`.
        f(index, unsafe { &mut *self.slots[index].0.get() })
    }

    /// Exclusive access to one slot (collection phase).
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        self.slots[index].0.get_mut()
    }

    /// Exclusive iteration over all slots (collection phase).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().map(|slot| slot.0.get_mut())
    }
}
