use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash, Hasher},
    mem,
    sync::atomic::{AtomicBool, Ordering},
};

#[cfg(feature = "unstable-debug-counters")]
use crate::debug_counters::InternalGlobalDebugCounters as Counters;

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

pub(crate) const DEFAULT_INITIAL_CAPACITY: usize = 16;

pub(crate) const INSTALLING_TAG: usize = 0b01; // set on key pointers until the value is in place
pub(crate) const FORWARDED_TAG: usize = 0b10; // set on key pointers once the slot has been migrated

pub(crate) const TOMBSTONE_TAG: usize = 0b01; // set on null value pointers when the entry is removed
pub(crate) const MIGRATING_TAG: usize = 0b10; // set on value pointers frozen for migration

/// One fixed-capacity link in the chain of tables.
pub(crate) struct Generation<K, V> {
    keys: Box<[Atomic<KeyNode<K, V>>]>,
    values: Box<[Atomic<ValueNode<V>>]>,
    next: Atomic<Generation<K, V>>,
    migrated: AtomicBool,
    pub(crate) epoch: usize,
}

impl<K, V> Generation<K, V> {
    pub(crate) fn with_capacity(epoch: usize, capacity: usize) -> Self {
        assert!(capacity > 0);

        let keys = (0..capacity).map(|_| Atomic::null()).collect();
        let values = (0..capacity).map(|_| Atomic::null()).collect();

        #[cfg(feature = "unstable-debug-counters")]
        Counters::generation_created(Self::byte_size(capacity));

        Self {
            keys,
            values,
            next: Atomic::null(),
            migrated: AtomicBool::new(false),
            epoch,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Option<&'g Generation<K, V>> {
        // SAFETY: a successor is only destroyed after it has been unlinked
        // from the table, and never before the guards that could reach it
        // through this generation are dropped.
        unsafe { self.next.load(Ordering::Acquire, guard).as_ref() }
    }

    /// Returns `true` once a full migration pass over this generation has
    /// finished. Every slot is then forwarded or sealed.
    pub(crate) fn is_migrated(&self) -> bool {
        self.migrated.load(Ordering::SeqCst)
    }

    fn home(&self, hash: u64) -> usize {
        (hash % self.capacity() as u64) as usize
    }

    fn successor<'g>(&self, guard: &'g Guard) -> &'g Generation<K, V> {
        match self.next(guard) {
            Some(next) => next,
            None => unreachable!("a forwarded slot in a generation without a successor"),
        }
    }

    fn grown_capacity(&self) -> usize {
        let capacity = self.capacity();
        assert!(capacity <= usize::MAX / 2, "capacity overflow");

        capacity * 2
    }

    #[cfg(feature = "unstable-debug-counters")]
    fn byte_size(capacity: usize) -> u64 {
        let slot_size =
            mem::size_of::<Atomic<KeyNode<K, V>>>() + mem::size_of::<Atomic<ValueNode<V>>>();

        (capacity * slot_size) as u64
    }
}

impl<K, V> Drop for Generation<K, V> {
    fn drop(&mut self) {
        // SAFETY: nothing else can reach a generation that is being dropped.
        let guard = unsafe { crossbeam_epoch::unprotected() };

        for (key, value) in self.keys.iter().zip(self.values.iter()) {
            let key_ptr = key.load(Ordering::Relaxed, guard);
            let value_ptr = value.load(Ordering::Relaxed, guard);

            if let Some(node) = unsafe { key_ptr.as_ref() } {
                // An install that never got its value into the slot still owns it.
                if key_ptr.tag() & INSTALLING_TAG != 0 && value_ptr.is_null() {
                    let pending = node.value.load(Ordering::Relaxed, guard);
                    if !pending.is_null() {
                        mem::drop(unsafe { pending.into_owned() });
                    }
                }

                mem::drop(unsafe { key_ptr.into_owned() });
            }

            if !value_ptr.is_null() {
                mem::drop(unsafe { value_ptr.into_owned() });
            }
        }

        #[cfg(feature = "unstable-debug-counters")]
        Counters::generation_dropped(Self::byte_size(self.capacity()));
    }
}

impl<'g, K: 'g + Eq + Clone, V: 'g + Clone> Generation<K, V> {
    pub(crate) fn get_and<Q, F, T>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: &Q,
        with_value: F,
    ) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let mut probe = self.probe(guard, hash);
        while let Some((i, key_ptr)) = probe.next() {
            match unsafe { KeySlot::of(key_ptr) } {
                KeySlot::Empty => return None,
                KeySlot::Installing(_) => {
                    self.finish_install(guard, i, key_ptr);
                    probe.reload();
                }
                KeySlot::Forwarded(None) => {
                    return self.successor(guard).get_and(guard, hash, key, with_value);
                }
                KeySlot::Forwarded(Some(node)) => {
                    if node.key.borrow() == key {
                        return self.successor(guard).get_and(guard, hash, key, with_value);
                    }
                }
                KeySlot::Settled(node) => {
                    if node.key.borrow() != key {
                        continue;
                    }

                    let value_ptr = self.values[i].load(Ordering::Acquire, guard);

                    // A frozen value is still the latest one for this key.
                    return match unsafe { ValueSlot::of(value_ptr) } {
                        ValueSlot::Live(value) | ValueSlot::Migrating(Some(value)) => {
                            Some(with_value(value))
                        }
                        ValueSlot::Empty | ValueSlot::Removed | ValueSlot::Migrating(None) => None,
                    };
                }
            }
        }

        self.next(guard)
            .and_then(|next| next.get_and(guard, hash, key, with_value))
    }

    pub(crate) fn remove_and<Q, F, T>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: &Q,
        with_previous_value: F,
    ) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let mut probe = self.probe(guard, hash);
        while let Some((i, key_ptr)) = probe.next() {
            match unsafe { KeySlot::of(key_ptr) } {
                KeySlot::Empty => return None,
                KeySlot::Installing(_) => {
                    self.finish_install(guard, i, key_ptr);
                    probe.reload();
                }
                KeySlot::Forwarded(None) => {
                    return self
                        .successor(guard)
                        .remove_and(guard, hash, key, with_previous_value);
                }
                KeySlot::Forwarded(Some(node)) => {
                    if node.key.borrow() == key {
                        return self
                            .successor(guard)
                            .remove_and(guard, hash, key, with_previous_value);
                    }
                }
                KeySlot::Settled(node) => {
                    if node.key.borrow() != key {
                        continue;
                    }

                    return self.remove_value_at(guard, i, hash, key, with_previous_value);
                }
            }
        }

        self.next(guard)
            .and_then(|next| next.remove_and(guard, hash, key, with_previous_value))
    }

    /// Tombstones the value of the settled slot `index`, which holds `key`.
    /// A value frozen for migration sends the removal after the key into the
    /// successor.
    fn remove_value_at<Q, F, T>(
        &self,
        guard: &'g Guard,
        index: usize,
        hash: u64,
        key: &Q,
        with_previous_value: F,
    ) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let backoff = Backoff::new();

        loop {
            let value_ptr = self.values[index].load(Ordering::Acquire, guard);

            match unsafe { ValueSlot::of(value_ptr) } {
                ValueSlot::Empty | ValueSlot::Removed => return None,
                ValueSlot::Migrating(_) => {
                    let next = self.successor(guard);
                    self.move_slot(guard, next, index);

                    return next.remove_and(guard, hash, key, with_previous_value);
                }
                ValueSlot::Live(value) => {
                    if self.values[index]
                        .compare_exchange(
                            value_ptr,
                            Shared::null().with_tag(TOMBSTONE_TAG),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            guard,
                        )
                        .is_ok()
                    {
                        let result = with_previous_value(value);
                        unsafe { guard.defer_destroy(value_ptr) };

                        return Some(result);
                    }

                    backoff.spin();
                }
            }
        }
    }

    /// Inserts or replaces the value for `entry`'s key, returning a clone of
    /// the previous value.
    ///
    /// Returns `Err` when a full lap over a generation that is not retiring
    /// found neither the key nor an empty slot. The error carries the
    /// generation that overflowed and the entry so the caller can grow the
    /// table and try again.
    pub(crate) fn put(
        &'g self,
        guard: &'g Guard,
        mut entry: PendingEntry<K, V>,
    ) -> Result<Option<V>, Overflow<'g, K, V>> {
        let mut probe = self.probe(guard, entry.hash);
        while let Some((i, key_ptr)) = probe.next() {
            match unsafe { KeySlot::of(key_ptr) } {
                KeySlot::Empty => match self.claim(guard, i, entry) {
                    Ok(()) => return Ok(None),
                    Err(rejected) => {
                        // Lost the race for this slot. Look at it again.
                        entry = rejected;
                        probe.reload();
                    }
                },
                KeySlot::Installing(_) => {
                    self.finish_install(guard, i, key_ptr);
                    probe.reload();
                }
                KeySlot::Forwarded(None) => return self.successor(guard).put(guard, entry),
                KeySlot::Forwarded(Some(node)) => {
                    if node.key == entry.key {
                        return self.successor(guard).put(guard, entry);
                    }
                }
                KeySlot::Settled(node) => {
                    if node.key != entry.key {
                        continue;
                    }

                    match self.replace_value(guard, i, entry.value) {
                        Ok(previous) => return Ok(previous),
                        Err(value) => {
                            // The slot has been forwarded in the meantime.
                            entry.value = value;
                            probe.reload();
                        }
                    }
                }
            }
        }

        match self.next(guard) {
            Some(next) => next.put(guard, entry),
            None => Err(Overflow {
                generation: self,
                entry,
            }),
        }
    }

    /// Migrates the entry in slot `index` into `next`, leaving the slot
    /// forwarded or sealed. Running it again on the same slot does nothing.
    pub(crate) fn move_slot(&self, guard: &'g Guard, next: &'g Generation<K, V>, index: usize) {
        let backoff = Backoff::new();

        loop {
            let key_ptr = self.keys[index].load(Ordering::Acquire, guard);

            let node = match unsafe { KeySlot::of(key_ptr) } {
                KeySlot::Forwarded(_) => return,
                KeySlot::Empty => {
                    // Seal the slot so that nothing can be installed behind
                    // the migration.
                    if self.keys[index]
                        .compare_exchange(
                            key_ptr,
                            key_ptr.with_tag(FORWARDED_TAG),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            guard,
                        )
                        .is_ok()
                    {
                        return;
                    }
                    continue;
                }
                KeySlot::Installing(_) => {
                    self.finish_install(guard, index, key_ptr);
                    continue;
                }
                KeySlot::Settled(node) => node,
            };

            let value_ptr = self.values[index].load(Ordering::Acquire, guard);

            let carried = match unsafe { ValueSlot::of(value_ptr) } {
                ValueSlot::Migrating(carried) => carried,
                state => {
                    let (frozen_ptr, carried) = match state {
                        ValueSlot::Live(value) => (value_ptr.with_tag(MIGRATING_TAG), Some(value)),
                        _ => (
                            Shared::null().with_tag(TOMBSTONE_TAG | MIGRATING_TAG),
                            None,
                        ),
                    };

                    if self.values[index]
                        .compare_exchange(
                            value_ptr,
                            frozen_ptr,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            guard,
                        )
                        .is_err()
                    {
                        backoff.spin();
                        continue;
                    }

                    carried
                }
            };

            if let Some(value) = carried {
                next.insert_migrated(guard, node.hash, &node.key, value);
            }

            let _ = self.keys[index].compare_exchange(
                key_ptr,
                key_ptr.with_tag(FORWARDED_TAG),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            );

            return;
        }
    }

    /// Links the successor generation if needed, then migrates every slot of
    /// this generation into it.
    pub(crate) fn grow(&self, guard: &'g Guard) -> &'g Generation<K, V> {
        let next = self.next_generation(guard);

        for index in 0..self.capacity() {
            self.move_slot(guard, next, index);
        }

        self.migrated.store(true, Ordering::SeqCst);
        guard.flush();

        next
    }

    fn next_generation(&self, guard: &'g Guard) -> &'g Generation<K, V> {
        let mut maybe_new_next = None;

        loop {
            let next_ptr = self.next.load(Ordering::Acquire, guard);

            if let Some(next_ref) = unsafe { next_ptr.as_ref() } {
                return next_ref;
            }

            let new_next = maybe_new_next.unwrap_or_else(|| {
                Owned::new(Generation::with_capacity(
                    self.epoch + 1,
                    self.grown_capacity(),
                ))
            });

            match self.next.compare_exchange_weak(
                Shared::null(),
                new_next,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(p) => return unsafe { p.deref() },
                Err(CompareExchangeError { new, .. }) => {
                    maybe_new_next = Some(new);
                }
            }
        }
    }

    /// Inserts a copy of a migrated entry unless its key is already present.
    fn insert_migrated(&self, guard: &'g Guard, hash: u64, key: &K, value: &V) {
        let mut pending = None;

        let mut probe = self.probe(guard, hash);
        while let Some((i, key_ptr)) = probe.next() {
            match unsafe { KeySlot::of(key_ptr) } {
                KeySlot::Empty => {
                    let entry = pending
                        .take()
                        .unwrap_or_else(|| PendingEntry::new(hash, key.clone(), value.clone()));

                    match self.claim(guard, i, entry) {
                        Ok(()) => return,
                        Err(rejected) => {
                            pending = Some(rejected);
                            probe.reload();
                        }
                    }
                }
                // Another helper got here first.
                KeySlot::Installing(node) | KeySlot::Settled(node) | KeySlot::Forwarded(Some(node))
                    if node.key == *key =>
                {
                    return
                }
                KeySlot::Installing(_) => {
                    self.finish_install(guard, i, key_ptr);
                    probe.reload();
                }
                KeySlot::Forwarded(None) => {
                    return self
                        .successor(guard)
                        .insert_migrated(guard, hash, key, value);
                }
                KeySlot::Settled(_) | KeySlot::Forwarded(Some(_)) => {}
            }
        }

        let next = match self.next(guard) {
            Some(next) => next,
            None => {
                #[cfg(feature = "logging")]
                log::debug!(
                    "Generation {} filled up while receiving migrated entries",
                    self.epoch
                );

                self.grow(guard)
            }
        };

        next.insert_migrated(guard, hash, key, value);
    }

    /// Replaces the value of a settled slot. Gives the new value back if the
    /// slot is frozen for migration, after making sure it has been forwarded.
    fn replace_value(
        &self,
        guard: &'g Guard,
        index: usize,
        mut value: Owned<ValueNode<V>>,
    ) -> Result<Option<V>, Owned<ValueNode<V>>> {
        let backoff = Backoff::new();

        loop {
            let value_ptr = self.values[index].load(Ordering::Acquire, guard);

            if value_ptr.tag() & MIGRATING_TAG != 0 {
                self.move_slot(guard, self.successor(guard), index);
                return Err(value);
            }

            match self.values[index].compare_exchange(
                value_ptr,
                value,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    let previous = unsafe { value_ptr.as_ref() }.map(|node| node.value.clone());

                    if previous.is_some() {
                        unsafe { guard.defer_destroy(value_ptr) };
                    }

                    return Ok(previous);
                }
                Err(CompareExchangeError { new, .. }) => {
                    value = new;
                    backoff.spin();
                }
            }
        }
    }
}

impl<'g, K: 'g, V: 'g> Generation<K, V> {
    fn probe<'p>(&'p self, guard: &'g Guard, hash: u64) -> Probe<'p, 'g, K, V> {
        let start = self.home(hash);

        Probe {
            generation: self,
            guard,
            start,
            index: start,
            visited: 0,
            reload: true,
        }
    }

    fn claim(
        &self,
        guard: &'g Guard,
        index: usize,
        entry: PendingEntry<K, V>,
    ) -> Result<(), PendingEntry<K, V>> {
        match self.keys[index].compare_exchange(
            Shared::null(),
            entry.into_installing(),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(key_ptr) => {
                self.finish_install(guard, index, key_ptr);
                Ok(())
            }
            // SAFETY: the rejected node was never published.
            Err(CompareExchangeError { new, .. }) => {
                Err(unsafe { PendingEntry::from_installing(new) })
            }
        }
    }

    /// Moves the value carried by an installing key node into its value slot,
    /// then settles the key. Any thread may call this for any install.
    fn finish_install(&self, guard: &'g Guard, index: usize, key_ptr: Shared<'g, KeyNode<K, V>>) {
        debug_assert!(key_ptr.tag() & INSTALLING_TAG != 0);

        let node = unsafe { key_ptr.deref() };
        let carried_ptr = node.value.load(Ordering::Acquire, guard);

        // Value slots never go back to a plain null, so this can only succeed
        // for the first helper.
        let _ = self.values[index].compare_exchange(
            Shared::null(),
            carried_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        );

        let _ = self.keys[index].compare_exchange(
            key_ptr,
            key_ptr.with_tag(0),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        );
    }
}

/// Visits every slot of a generation once, starting at the home slot of a
/// hash. Slots of a retiring generation are migrated before they are handed
/// out.
struct Probe<'p, 'g, K: 'g, V: 'g> {
    generation: &'p Generation<K, V>,
    guard: &'g Guard,
    start: usize,
    index: usize,
    visited: usize,
    reload: bool,
}

impl<'p, 'g, K: 'g, V: 'g> Probe<'p, 'g, K, V> {
    fn reload(&mut self) {
        self.reload = true;
    }
}

impl<'p, 'g, K: 'g + Eq + Clone, V: 'g + Clone> Iterator for Probe<'p, 'g, K, V> {
    type Item = (usize, Shared<'g, KeyNode<K, V>>);

    fn next(&mut self) -> Option<Self::Item> {
        let capacity = self.generation.capacity();

        if !self.reload {
            if self.visited + 1 >= capacity {
                return None;
            }
            self.visited += 1;
            self.index = (self.start + self.visited) % capacity;
        }
        self.reload = false;

        if let Some(next) = self.generation.next(self.guard) {
            self.generation.move_slot(self.guard, next, self.index);
        }

        let key_ptr = self.generation.keys[self.index].load(Ordering::Acquire, self.guard);

        Some((self.index, key_ptr))
    }
}

#[repr(align(8))]
pub(crate) struct KeyNode<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    // The value to install. Only read while the key pointer is installing.
    value: Atomic<ValueNode<V>>,
}

#[repr(align(8))]
#[derive(Debug)]
pub(crate) struct ValueNode<V> {
    pub(crate) value: V,
}

impl<V> ValueNode<V> {
    pub(crate) fn new(value: V) -> Self {
        #[cfg(feature = "unstable-debug-counters")]
        Counters::value_node_created();

        Self { value }
    }
}

#[cfg(feature = "unstable-debug-counters")]
impl<V> Drop for ValueNode<V> {
    fn drop(&mut self) {
        Counters::value_node_dropped();
    }
}

enum KeySlot<'g, K, V> {
    Empty,
    Installing(&'g KeyNode<K, V>),
    Settled(&'g KeyNode<K, V>),
    // `None` is a sealed slot.
    Forwarded(Option<&'g KeyNode<K, V>>),
}

impl<'g, K: 'g, V: 'g> KeySlot<'g, K, V> {
    /// # Safety
    ///
    /// `key_ptr` must have been loaded from a key slot of a generation that
    /// the guard keeps alive.
    unsafe fn of(key_ptr: Shared<'g, KeyNode<K, V>>) -> Self {
        let node = key_ptr.as_ref();

        if key_ptr.tag() & FORWARDED_TAG != 0 {
            return KeySlot::Forwarded(node);
        }

        match node {
            None => KeySlot::Empty,
            Some(node) if key_ptr.tag() & INSTALLING_TAG != 0 => KeySlot::Installing(node),
            Some(node) => KeySlot::Settled(node),
        }
    }
}

enum ValueSlot<'g, V> {
    Empty,
    Live(&'g V),
    Removed,
    // `None` is a removed entry frozen for migration.
    Migrating(Option<&'g V>),
}

impl<'g, V: 'g> ValueSlot<'g, V> {
    /// # Safety
    ///
    /// `value_ptr` must have been loaded under the guard from a value slot.
    unsafe fn of(value_ptr: Shared<'g, ValueNode<V>>) -> Self {
        let value = value_ptr.as_ref().map(|node| &node.value);
        let tag = value_ptr.tag();

        if tag & MIGRATING_TAG != 0 {
            ValueSlot::Migrating(value)
        } else if tag & TOMBSTONE_TAG != 0 {
            ValueSlot::Removed
        } else {
            match value {
                Some(value) => ValueSlot::Live(value),
                None => ValueSlot::Empty,
            }
        }
    }
}

/// A key and value that have not been published into any slot yet.
pub(crate) struct PendingEntry<K, V> {
    pub(crate) hash: u64,
    key: K,
    value: Owned<ValueNode<V>>,
}

impl<K, V> PendingEntry<K, V> {
    pub(crate) fn new(hash: u64, key: K, value: V) -> Self {
        Self {
            hash,
            key,
            value: Owned::new(ValueNode::new(value)),
        }
    }

    fn into_installing(self) -> Owned<KeyNode<K, V>> {
        Owned::new(KeyNode {
            hash: self.hash,
            key: self.key,
            value: Atomic::from(self.value),
        })
        .with_tag(INSTALLING_TAG)
    }

    /// # Safety
    ///
    /// `node` must come from [`into_installing`](Self::into_installing) and
    /// must never have been visible to another thread.
    unsafe fn from_installing(node: Owned<KeyNode<K, V>>) -> Self {
        let KeyNode { hash, key, value } = *node.into_box();

        Self {
            hash,
            key,
            value: value.into_owned(),
        }
    }
}

pub(crate) struct Overflow<'g, K, V> {
    pub(crate) generation: &'g Generation<K, V>,
    pub(crate) entry: PendingEntry<K, V>,
}

pub(crate) fn hash<K, H>(build_hasher: &H, key: &K) -> u64
where
    K: ?Sized + Hash,
    H: BuildHasher,
{
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);

    hasher.finish()
}
