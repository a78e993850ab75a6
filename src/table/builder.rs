use super::{generation::DEFAULT_INITIAL_CAPACITY, map::HashTable, DefaultHashBuilder};
use crate::common::error::BuildError;

use std::marker::PhantomData;

/// Builds a [`HashTable`][table-struct] with various configuration knobs.
///
/// [table-struct]: ./struct.HashTable.html
///
/// # Examples
///
/// ```rust
/// use chaintable::TableBuilder;
///
/// let table = TableBuilder::new(64) // 64 slots in the first generation
///     // A name to tell tables apart in the logs.
///     .name("sessions")
///     // Create the table.
///     .build();
///
/// table.put("alice", 1);
/// assert_eq!(table.get("alice"), Some(1));
/// assert_eq!(table.name(), Some("sessions"));
/// ```
///
pub struct TableBuilder<K, V, S = DefaultHashBuilder> {
    initial_capacity: usize,
    build_hasher: S,
    name: Option<String>,
    table_type: PhantomData<(K, V)>,
}

impl<K, V> Default for TableBuilder<K, V, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPACITY)
    }
}

impl<K, V> TableBuilder<K, V, DefaultHashBuilder> {
    /// Construct a new `TableBuilder` that will be used to build a `HashTable`
    /// whose first generation has `initial_capacity` slots.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            build_hasher: DefaultHashBuilder::default(),
            name: None,
            table_type: PhantomData,
        }
    }
}

impl<K, V, S> TableBuilder<K, V, S> {
    /// Sets the number of slots of the first generation.
    pub fn initial_capacity(self, initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            ..self
        }
    }

    /// Sets the name of the table. The name is shown in log messages and in
    /// the `Debug` output.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the hasher used to hash the keys.
    pub fn hasher<S2>(self, build_hasher: S2) -> TableBuilder<K, V, S2> {
        TableBuilder {
            initial_capacity: self.initial_capacity,
            build_hasher,
            name: self.name,
            table_type: PhantomData,
        }
    }

    /// Builds a `HashTable<K, V, S>`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroCapacity`] if the initial capacity is 0.
    ///
    /// [`BuildError::ZeroCapacity`]: ./enum.BuildError.html#variant.ZeroCapacity
    pub fn try_build(self) -> Result<HashTable<K, V, S>, BuildError> {
        if self.initial_capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }

        Ok(HashTable::with_everything(
            self.initial_capacity,
            self.build_hasher,
            self.name,
        ))
    }

    /// Builds a `HashTable<K, V, S>`.
    ///
    /// # Panics
    ///
    /// Panics if the initial capacity is 0.
    pub fn build(self) -> HashTable<K, V, S> {
        match self.try_build() {
            Ok(table) => table,
            Err(e) => panic!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TableBuilder;
    use crate::{table::test_util::IdentityHashBuilder, BuildError, HashTable};

    #[test]
    fn build_table() {
        // Default.
        let table = TableBuilder::default().build();
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.name(), None);

        table.put('a', "Alice");
        assert_eq!(table.get(&'a'), Some("Alice"));

        // Capacity and name.
        let table = TableBuilder::new(100).name("builder test").build();
        assert_eq!(table.capacity(), 100);
        assert_eq!(table.name(), Some("builder test"));

        table.put('b', "Bob");
        assert_eq!(table.get(&'b'), Some("Bob"));

        // Custom hasher.
        let table = HashTable::builder(1)
            .initial_capacity(3)
            .hasher(IdentityHashBuilder::default())
            .build();
        assert_eq!(table.capacity(), 3);

        table.put(7u64, 'x');
        assert_eq!(table.get(&7u64), Some('x'));
    }

    #[test]
    fn zero_capacity_is_an_error() {
        let result = TableBuilder::<char, &str>::new(0).try_build();
        assert_eq!(result.err(), Some(BuildError::ZeroCapacity));

        let result = TableBuilder::<char, &str>::new(8)
            .initial_capacity(0)
            .try_build();
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "the initial capacity of a hash table must be at least 1")]
    fn build_with_zero_capacity() {
        let _table = TableBuilder::<char, &str>::new(0).build();
    }
}
