
use std::{
    borrow::Borrow,
    hash::{BuildHasherDefault, Hash, Hasher},
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_epoch::Owned;

/// A value that reports to a shared [`DropTracker`] how many copies of it
/// are alive. Migration clones keys and values, so a single entry may be
/// alive in more than one generation for a while.
#[derive(Debug)]
pub(crate) struct TrackedDropper<T> {
    tracker: Arc<DropTracker>,
    pub elem: T,
}

impl<T> TrackedDropper<T> {
    pub(crate) fn new(tracker: Arc<DropTracker>, elem: T) -> Self {
        tracker.live.fetch_add(1, Ordering::Relaxed);

        Self { tracker, elem }
    }
}

impl<T: Clone> Clone for TrackedDropper<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.tracker), self.elem.clone())
    }
}

impl<T> Drop for TrackedDropper<T> {
    fn drop(&mut self) {
        let previous = self.tracker.live.fetch_sub(1, Ordering::Relaxed);
        assert!(previous > 0);
    }
}

impl<T: PartialEq> PartialEq for TrackedDropper<T> {
    fn eq(&self, other: &Self) -> bool {
        self.elem == other.elem
    }
}

impl<T: PartialEq> PartialEq<T> for TrackedDropper<T> {
    fn eq(&self, other: &T) -> bool {
        &self.elem == other
    }
}

impl<T: Eq> Eq for TrackedDropper<T> {}

impl<T: Hash> Hash for TrackedDropper<T> {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.elem.hash(hasher);
    }
}

impl<T> Borrow<T> for TrackedDropper<T> {
    fn borrow(&self) -> &T {
        &self.elem
    }
}

impl<T> Deref for TrackedDropper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.elem
    }
}

#[derive(Debug, Default)]
pub(crate) struct DropTracker {
    live: AtomicUsize,
}

impl DropTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub(crate) fn all_dropped(&self) -> bool {
        self.live() == 0
    }
}

/// Uses the last integer written as the hash, so tests can pick home slots.
#[derive(Default)]
pub(crate) struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 = (self.0 << 8) | u64::from(byte);
        }
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
}

pub(crate) type IdentityHashBuilder = BuildHasherDefault<IdentityHasher>;

pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}
