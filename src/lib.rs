#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A lock-free, resizable hash table.
//!
//! [`HashTable`] supports concurrent [`put`][put], [`get`][get] and
//! [`remove`][remove] from any number of threads. No operation ever takes a
//! lock or waits for another thread. When a linear probe fails to find room
//! for a new key, the table links a successor generation of twice the
//! capacity and every thread that touches an old slot carries it over, so
//! growth never pauses readers or writers.
//!
//! Retired generations and replaced values are reclaimed with
//! [`crossbeam-epoch`][epoch].
//!
//! # Example
//!
//! ```rust
//! use chaintable::HashTable;
//!
//! use std::{sync::Arc, thread};
//!
//! let table = Arc::new(HashTable::with_capacity(2));
//!
//! let handles: Vec<_> = (0..4u64)
//!     .map(|t| {
//!         let table = Arc::clone(&table);
//!         thread::spawn(move || {
//!             for i in 0..64 {
//!                 table.put(t * 64 + i, i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(table.len(), 256);
//! assert_eq!(table.get(&70), Some(6));
//! assert_eq!(table.remove(&70), Some(6));
//! assert_eq!(table.get(&70), None);
//! ```
//!
//! [put]: ./struct.HashTable.html#method.put
//! [get]: ./struct.HashTable.html#method.get
//! [remove]: ./struct.HashTable.html#method.remove
//! [epoch]: https://docs.rs/crossbeam-epoch

pub(crate) mod common;
pub mod table;

#[cfg(feature = "unstable-debug-counters")]
#[cfg_attr(docsrs, doc(cfg(feature = "unstable-debug-counters")))]
mod debug_counters;

pub use common::error::BuildError;
pub use table::{DefaultHashBuilder, HashTable, TableBuilder};

#[cfg(feature = "unstable-debug-counters")]
#[cfg_attr(docsrs, doc(cfg(feature = "unstable-debug-counters")))]
pub use debug_counters::GlobalDebugCounters;
