//! A lock-free hash table implemented with a chain of open addressing
//! generations and linear probing.

use super::{
    builder::TableBuilder,
    generation::{self, Generation, DEFAULT_INITIAL_CAPACITY},
    generation_ref::GenerationRef,
    DefaultHashBuilder,
};

use std::{
    borrow::Borrow,
    fmt,
    hash::{BuildHasher, Hash},
    mem,
    sync::atomic::{self, AtomicUsize, Ordering},
};

use crossbeam_epoch::{Atomic, Owned, Shared};
use crossbeam_utils::CachePadded;

/// A lock-free hash table implemented with a chain of open addressing
/// generations and linear probing.
///
/// All operations take `&self`, so a `HashTable` is usually shared between
/// threads through an [`Arc`]. Keys and values are cloned when an entry is
/// carried over into a bigger generation, and values are cloned when they
/// are returned.
///
/// By default, `HashTable` uses a hashing algorithm selected to provide
/// resistance against HashDoS attacks. It is the one used by
/// `std::collections::HashMap`, which is currently SipHash 1-3.
///
/// The hashing algorithm can be replaced on a per-`HashTable` basis using the
/// [`default`], [`with_hasher`] and [`with_capacity_and_hasher`] methods, or
/// with [`TableBuilder::hasher`]. Many alternative algorithms are available
/// on crates.io, such as the [`aHash`] crate.
///
/// It is required that the keys implement the [`Eq`] and [`Hash`] traits. If
/// you implement these yourself, it is important that the following property
/// holds:
///
/// ```text
/// k1 == k2 -> hash(k1) == hash(k2)
/// ```
///
/// It is a logic error for a key to be modified in such a way that the key's
/// hash or its equality changes while it is in the table.
///
/// [`Arc`]: https://doc.rust-lang.org/std/sync/struct.Arc.html
/// [`aHash`]: https://crates.io/crates/ahash
/// [`default`]: #method.default
/// [`with_hasher`]: #method.with_hasher
/// [`with_capacity_and_hasher`]: #method.with_capacity_and_hasher
/// [`TableBuilder::hasher`]: ./struct.TableBuilder.html#method.hasher
/// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
/// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
pub struct HashTable<K, V, S = DefaultHashBuilder> {
    current: CachePadded<Atomic<Generation<K, V>>>,
    build_hasher: S,
    len: AtomicUsize,
    name: Option<String>,
}

impl<K, V> HashTable<K, V, DefaultHashBuilder> {
    /// Creates an empty `HashTable` with 16 slots.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    /// Creates an empty `HashTable` whose first generation has exactly
    /// `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0. Use [`TableBuilder::try_build`] to get an
    /// error instead.
    ///
    /// [`TableBuilder::try_build`]: ./struct.TableBuilder.html#method.try_build
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }

    /// Returns a [`TableBuilder`], which can build a `HashTable` with a name or
    /// a custom hasher.
    ///
    /// [`TableBuilder`]: ./struct.TableBuilder.html
    pub fn builder(initial_capacity: usize) -> TableBuilder<K, V, DefaultHashBuilder> {
        TableBuilder::new(initial_capacity)
    }
}

impl<K, V, S> HashTable<K, V, S> {
    /// Creates an empty `HashTable` with 16 slots, using `build_hasher` to
    /// hash the keys.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self::with_capacity_and_hasher(DEFAULT_INITIAL_CAPACITY, build_hasher)
    }

    /// Creates an empty `HashTable` whose first generation has exactly
    /// `capacity` slots, using `build_hasher` to hash the keys.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        assert!(capacity > 0, "the initial capacity must be at least 1");

        Self::with_everything(capacity, build_hasher, None)
    }

    pub(crate) fn with_everything(capacity: usize, build_hasher: S, name: Option<String>) -> Self {
        let first = Owned::new(Generation::with_capacity(0, capacity));

        #[cfg(feature = "logging")]
        log::debug!(
            "{}Created a hash table with {} slots",
            name.as_deref().map(|n| format!("[{n}] ")).unwrap_or_default(),
            capacity
        );

        Self {
            current: CachePadded::new(Atomic::from(first)),
            build_hasher,
            len: AtomicUsize::new(0),
            name,
        }
    }

    /// Returns the number of entries in the table.
    ///
    /// The count is maintained next to the slots rather than derived from
    /// them, so while other threads are mutating the table it may be briefly
    /// off by the number of operations in flight. A remove can decrement the
    /// count before the put that inserted the entry has incremented it; the
    /// count then reads as zero instead of wrapping around.
    pub fn len(&self) -> usize {
        let len = self.len.load(Ordering::Relaxed);

        if len > isize::MAX as usize {
            0
        } else {
            len
        }
    }

    /// Returns `true` if the table contains no entries.
    ///
    /// See [`len`](#method.len) for the same caveat under concurrency.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots in the current generation.
    ///
    /// A generation that is still being migrated stays current until its
    /// migration is done, so this may lag behind a resize in progress.
    pub fn capacity(&self) -> usize {
        self.generation_ref().capacity()
    }

    /// Returns the name of the table, if one was given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns a reference to the table's [`BuildHasher`].
    ///
    /// [`BuildHasher`]: https://doc.rust-lang.org/std/hash/trait.BuildHasher.html
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }
}

impl<K: Hash + Eq + Clone, V: Clone, S: BuildHasher> HashTable<K, V, S> {
    /// Inserts a key-value pair into the table, returning a clone of the value
    /// previously corresponding to the key.
    ///
    /// If the current generation has no room left for the key, this call grows
    /// the table and tries again, helping whatever migration is under way.
    #[inline]
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let hash = generation::hash(&self.build_hasher, &key);

        self.generation_ref().put(key, hash, value)
    }

    /// Returns a clone of the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the table's key type, but
    /// [`Hash`] and [`Eq`] on the borrowed form *must* match those for
    /// the key type.
    ///
    /// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
    /// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
    #[inline]
    pub fn get<Q: Hash + Eq + ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
    {
        self.get_and(key, V::clone)
    }

    /// Returns the result of invoking a function with a reference to the
    /// value corresponding to the key.
    ///
    /// The key may be any borrowed form of the table's key type, but
    /// [`Hash`] and [`Eq`] on the borrowed form *must* match those for
    /// the key type.
    ///
    /// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
    /// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
    #[inline]
    pub fn get_and<Q: Hash + Eq + ?Sized, F: FnOnce(&V) -> T, T>(
        &self,
        key: &Q,
        with_value: F,
    ) -> Option<T>
    where
        K: Borrow<Q>,
    {
        let hash = generation::hash(&self.build_hasher, key);

        self.generation_ref().get_and(key, hash, with_value)
    }

    /// Returns `true` if the table contains a value for the key.
    #[inline]
    pub fn contains_key<Q: Hash + Eq + ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
    {
        self.get_and(key, |_| ()).is_some()
    }

    /// Removes a key from the table, returning a clone of the value previously
    /// corresponding to the key.
    ///
    /// The key may be any borrowed form of the table's key type, but
    /// [`Hash`] and [`Eq`] on the borrowed form *must* match those for
    /// the key type.
    ///
    /// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
    /// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
    #[inline]
    pub fn remove<Q: Hash + Eq + ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
    {
        self.remove_and(key, V::clone)
    }

    /// Removes a key from the table, returning the result of invoking a
    /// function with a reference to the value previously corresponding to the
    /// key.
    #[inline]
    pub fn remove_and<Q: Hash + Eq + ?Sized, F: FnOnce(&V) -> T, T>(
        &self,
        key: &Q,
        with_previous_value: F,
    ) -> Option<T>
    where
        K: Borrow<Q>,
    {
        let hash = generation::hash(&self.build_hasher, key);

        self.generation_ref().remove_and(key, hash, with_previous_value)
    }
}

impl<K, V, S: Default> Default for HashTable<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> fmt::Debug for HashTable<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<K, V, S> Drop for HashTable<K, V, S> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        atomic::fence(Ordering::Acquire);

        // Generations that were unlinked are already owned by the collector.
        let mut current_ptr = self.current.load(Ordering::Relaxed, guard);

        while let Some(current_ref) = unsafe { current_ptr.as_ref() } {
            let next_ptr = current_ref
                .next(guard)
                .map_or_else(Shared::null, |next_ref| {
                    (next_ref as *const Generation<K, V>).into()
                });

            mem::drop(unsafe { current_ptr.into_owned() });

            current_ptr = next_ptr;
        }
    }
}

impl<K, V, S> HashTable<K, V, S> {
    #[inline]
    fn generation_ref(&self) -> GenerationRef<'_, K, V> {
        GenerationRef {
            current: &*self.current,
            len: &self.len,
            name: self.name.as_deref(),
        }
    }

    #[cfg(test)]
    pub(crate) fn current_epoch(&self) -> usize {
        let guard = &crossbeam_epoch::pin();

        unsafe { self.current.load(Ordering::Acquire, guard).deref() }.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::HashTable;
    use crate::{table::test_util::IdentityHashBuilder, write_test_cases_for_me};

    use std::sync::atomic::Ordering;

    write_test_cases_for_me!(HashTable);

    #[test]
    fn overflow_grows_to_double_capacity() {
        let table = HashTable::with_capacity_and_hasher(2, IdentityHashBuilder::default());

        assert_eq!(table.put(0u64, "a"), None);
        assert_eq!(table.put(1u64, "b"), None);
        assert_eq!(table.capacity(), 2);
        assert_eq!(table.current_epoch(), 0);

        // Shares slot 0 with the first key and finds no room.
        assert_eq!(table.put(2u64, "c"), None);

        assert_eq!(table.capacity(), 4);
        assert_eq!(table.current_epoch(), 1);
        assert_eq!(table.len(), 3);

        assert_eq!(table.get(&0u64), Some("a"));
        assert_eq!(table.get(&1u64), Some("b"));
        assert_eq!(table.get(&2u64), Some("c"));
    }

    #[test]
    fn removed_key_comes_back() {
        let table = HashTable::new();

        assert_eq!(table.put("k", 1), None);
        assert_eq!(table.put("k", 2), Some(1));
        assert_eq!(table.remove("k"), Some(2));
        assert_eq!(table.get("k"), None);
        assert!(table.is_empty());

        assert_eq!(table.put("k", 3), None);
        assert_eq!(table.get("k"), Some(3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn removals_survive_growth() {
        let table = HashTable::with_capacity_and_hasher(4, IdentityHashBuilder::default());

        for i in 0..4u64 {
            assert_eq!(table.put(i, i), None);
        }
        assert_eq!(table.remove(&1u64), Some(1));

        // Slot 1 still holds key 1, so the table is full for new keys.
        assert_eq!(table.put(4, 4), None);
        assert_eq!(table.capacity(), 8);

        assert_eq!(table.get(&1u64), None);
        assert!(!table.contains_key(&1u64));
        for i in [0u64, 2, 3, 4] {
            assert_eq!(table.get(&i), Some(i));
        }

        assert_eq!(table.put(1, 10), None);
        assert_eq!(table.get(&1u64), Some(10));
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn repeated_growth_from_one_slot() {
        let table = HashTable::with_capacity(1);

        for i in 0..1000 {
            assert_eq!(table.put(i, i * 2), None);
        }

        assert_eq!(table.len(), 1000);
        assert!(table.capacity() >= 1000);
        assert!(table.current_epoch() >= 10);

        for i in 0..1000 {
            assert_eq!(table.get(&i), Some(i * 2));
        }
    }

    #[test]
    fn get_and_remove_and_see_the_value() {
        let table = HashTable::new();
        table.put("key".to_string(), vec![1, 2, 3]);

        assert_eq!(table.get_and("key", |v| v.len()), Some(3));
        assert_eq!(table.get_and("missing", |v| v.len()), None);
        assert_eq!(table.remove_and("key", |v| v.iter().sum::<i32>()), Some(6));
        assert_eq!(table.remove_and("key", |v| v.len()), None);
    }

    #[test]
    #[should_panic(expected = "the initial capacity must be at least 1")]
    fn zero_capacity_panics() {
        let _table: HashTable<i32, i32> = HashTable::with_capacity(0);
    }

    #[test]
    fn debug_shows_name_and_size() {
        let table = HashTable::builder(8).name("debugged").build();
        table.put(1, 1);

        assert_eq!(
            format!("{table:?}"),
            r#"HashTable { name: Some("debugged"), len: 1, capacity: 8 }"#
        );
    }

    #[test]
    fn len_reads_zero_while_a_remove_runs_ahead_of_its_put() {
        let table = HashTable::new();
        table.put(1, 1);

        // A concurrent remove has counted its entry before the put that
        // inserted it got to count it.
        table.len.fetch_sub(2, Ordering::Relaxed);
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());

        table.len.fetch_add(1, Ordering::Relaxed);
        assert_eq!(table.len(), 0);

        table.len.fetch_add(1, Ordering::Relaxed);
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }
}
