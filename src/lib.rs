//! `ext-pq` is a rust external memory priority queue implementation.
//!
//! An external-memory priority queue can handle far more data than fits into
//! the main memory (RAM) of a computer. A small, bounded amount of data is
//! kept in fast in-memory heaps while the bulk is spilled to disk as sorted
//! runs organized into a cascading merge hierarchy, so `push` and `pop`
//! retain correct global minimum/maximum semantics at an amortized I/O cost
//! that stays sub-logarithmic per operation. For background see
//! [External Memory Algorithms](https://en.wikipedia.org/wiki/External_memory_algorithm).
//!
//! # Overview
//!
//! `ext-pq` supports the following features:
//!
//! * **Data agnostic:**
//!   it supports all data types that implement `serde` serialization/deserialization by default,
//!   otherwise you can implement your own run storage format.
//! * **Order agnostic:**
//!   the queue is a min-queue or a max-queue purely depending on the comparator you supply;
//!   `build_min`/`build_max` cover the natural order of `Ord` types.
//! * **Memory limit support:**
//!   the queue sizes its buffers against an explicit byte budget and charges every
//!   long-lived structure it creates to that budget, failing fast when it cannot fit.
//! * **Multithreading support:**
//!   flushed buffers are sorted on a thread pool utilizing maximum CPU resources
//!   before they are spilled to disk.
//!
//! # Example
//!
//! ```no_run
//! use ext_pq::ExternalPriorityQueueBuilder;
//!
//! fn main() {
//!     let mut queue = ExternalPriorityQueueBuilder::<u64>::new()
//!         .with_memory_limit(64 * 1024 * 1024)
//!         .build_min()
//!         .unwrap();
//!
//!     for value in (0..10_000_000u64).rev() {
//!         queue.push(value).unwrap();
//!     }
//!
//!     while !queue.is_empty() {
//!         println!("{}", queue.pop().unwrap());
//!     }
//! }
//! ```

pub mod group;
pub mod heap;
pub mod hierarchy;
pub mod memory;
pub mod merge;
pub mod queue;
pub mod run;

pub use heap::{BoundedHeap, CapacityError, Compare, OrderBy};
pub use memory::{MemoryBudget, MemoryError};
pub use merge::HeapMerger;
pub use queue::{ExternalPriorityQueue, ExternalPriorityQueueBuilder, QueueError};
pub use run::{RmpRun, RmpRunError, SortedRun};
