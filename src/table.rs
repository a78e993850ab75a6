//! Lock-free resizable hash tables.
//!
//! The hash table in this crate is an open addressing hash table with linear
//! probing. Its storage is a chain of *generations*. A generation consists of
//! two parallel arrays of atomic pointers, one for keys and one for values, an
//! atomic pointer to the next generation, and an epoch number. The table
//! itself only holds an atomic pointer to the current generation.
//!
//! Each key slot moves through a fixed sequence of states. An empty slot is
//! claimed by CAS'ing in a pointer to a freshly allocated key node with the
//! installing tag bit set. The key node carries the key, its hash, and the
//! value to be installed alongside it. Any thread that reads an installing key
//! pointer finishes the install on the claimer's behalf: it CAS'es the carried
//! value into the empty value slot, then clears the installing bit. From then
//! on the slot is settled, and the same key node stays in it for the rest of
//! the generation's life. Only the tag bits of a key pointer ever change after
//! a claim, so a slot that held a key never holds a different key.
//!
//! Value slots hold pointers to boxed values. Updates CAS one value pointer
//! with another. Removals CAS a value pointer with a null pointer that has the
//! tombstone bit set, and a later insertion of the same key may CAS the
//! tombstone back into a value.
//!
//! When a probe visits every slot of a generation without finding an empty
//! slot or its key, the generation has overflowed. The thread that noticed
//! CAS'es a new generation of double capacity into the `next` pointer and then
//! walks every slot of the old generation, migrating each one. From the
//! moment `next` is set, the old generation is *retiring*: every operation
//! that visits one of its slots migrates that slot before looking at it. So
//! migration is done by whoever happens to be there, and no single thread can
//! hold it up.
//!
//! Migrating a slot is a two phase protocol. First the value pointer is
//! frozen by setting its migrating bit; after that no update or removal can
//! succeed on it, and readers may still answer from the frozen value. Then a
//! copy of the entry is inserted into the next generation, unless the key is
//! already there, and the key pointer gets its forwarded bit set. Operations
//! that reach a forwarded slot for their key follow it into the next
//! generation. Empty key slots are migrated by setting the forwarded bit on
//! the null pointer; such a sealed slot can no longer be claimed, and tells a
//! probe that its key, if present anywhere, lives in the next generation.
//! Every step is a CAS from one specific state to the next, so running the
//! migration of a slot any number of times from any number of threads has the
//! same effect as running it once.
//!
//! Once a full pass over the old generation completes it is marked migrated,
//! and the table pointer is swung to its successor. The old generation is then
//! handed to [`crossbeam-epoch`] for destruction once no thread can still be
//! reading it.
//!
//! A migrated entry is inserted into the next generation with a full linear
//! probe from its home slot, skipping keys that are already there. If the
//! next generation fills up while entries are still arriving, it grows in
//! turn and the entries continue into its successor.
//!
//! [`crossbeam-epoch`]: https://docs.rs/crossbeam-epoch

pub(crate) mod builder;
pub(crate) mod generation;
pub(crate) mod generation_ref;
pub(crate) mod map;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_util;

use std::collections::hash_map::RandomState;

pub use builder::TableBuilder;
pub use map::HashTable;

/// Default hasher for `HashTable`.
pub type DefaultHashBuilder = RandomState;
