use super::generation::{Generation, Overflow, PendingEntry};

use std::{
    borrow::Borrow,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Shared};

pub(crate) struct GenerationRef<'a, K, V> {
    pub(crate) current: &'a Atomic<Generation<K, V>>,
    pub(crate) len: &'a AtomicUsize,
    #[cfg_attr(not(feature = "logging"), allow(dead_code))]
    pub(crate) name: Option<&'a str>,
}

impl<'a, K: Eq + Clone, V: Clone> GenerationRef<'a, K, V> {
    pub(crate) fn get_and<Q, F, T>(&self, key: &Q, hash: u64, with_value: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let guard = &crossbeam_epoch::pin();

        self.get(guard).get_and(guard, hash, key, with_value)
    }

    pub(crate) fn remove_and<Q, F, T>(
        &self,
        key: &Q,
        hash: u64,
        with_previous_value: F,
    ) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let guard = &crossbeam_epoch::pin();

        let result = self
            .get(guard)
            .remove_and(guard, hash, key, with_previous_value);

        if result.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }

        result
    }

    pub(crate) fn put(&self, key: K, hash: u64, value: V) -> Option<V> {
        let guard = &crossbeam_epoch::pin();
        let mut entry = PendingEntry::new(hash, key, value);

        loop {
            match self.get(guard).put(guard, entry) {
                Ok(previous) => {
                    if previous.is_none() {
                        self.len.fetch_add(1, Ordering::Relaxed);
                    }

                    return previous;
                }
                Err(Overflow {
                    generation,
                    entry: rejected,
                }) => {
                    entry = rejected;
                    self.resize(guard, generation);
                }
            }
        }
    }

    fn resize(&self, guard: &Guard, generation: &Generation<K, V>) {
        #[cfg(feature = "logging")]
        log::debug!(
            "{}Generation {} is full; growing from {} to {} slots",
            self.log_prefix(),
            generation.epoch,
            generation.capacity(),
            generation.capacity().saturating_mul(2),
        );

        generation.grow(guard);
        self.swing(guard);
    }
}

impl<'a, 'g, K: 'g, V: 'g> GenerationRef<'a, K, V> {
    pub(crate) fn capacity(&self) -> usize {
        let guard = &crossbeam_epoch::pin();

        self.get(guard).capacity()
    }

    /// Loads the current generation, first moving the table past any
    /// generation whose migration has already finished.
    fn get(&self, guard: &'g Guard) -> &'g Generation<K, V> {
        let current_ref = self.load(guard);

        if !current_ref.is_migrated() {
            return current_ref;
        }

        self.swing(guard);
        self.load(guard)
    }

    fn load(&self, guard: &'g Guard) -> &'g Generation<K, V> {
        let current_ptr = self.current.load(Ordering::Acquire, guard);
        assert!(!current_ptr.is_null());

        // SAFETY: unlinked generations are destroyed only after every guard
        // that could have loaded them is gone.
        unsafe { current_ptr.deref() }
    }

    /// Swings the current generation pointer forward across every
    /// generation that has been fully migrated.
    fn swing(&self, guard: &'g Guard) {
        loop {
            let current_ptr = self.current.load(Ordering::SeqCst, guard);
            let current_ref = unsafe { current_ptr.deref() };

            if !current_ref.is_migrated() {
                return;
            }

            let next_ref = match current_ref.next(guard) {
                Some(next_ref) => next_ref,
                None => return,
            };
            let next_ptr: Shared<'g, _> = (next_ref as *const Generation<K, V>).into();

            if self
                .current
                .compare_exchange(
                    current_ptr,
                    next_ptr,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    guard,
                )
                .is_ok()
            {
                #[cfg(feature = "logging")]
                log::trace!(
                    "{}Generation {} retired; generation {} with {} slots is now current",
                    self.log_prefix(),
                    current_ref.epoch,
                    next_ref.epoch,
                    next_ref.capacity(),
                );

                // Only the thread that unlinked the generation destroys it.
                unsafe { guard.defer_destroy(current_ptr) };
            }
        }
    }

    #[cfg(feature = "logging")]
    fn log_prefix(&self) -> String {
        self.name.map(|name| format!("[{name}] ")).unwrap_or_default()
    }
}
