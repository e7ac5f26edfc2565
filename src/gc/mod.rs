//! Garbage-collected heap
//!
//! Objects live in a handle-addressed pool; collection is mark-and-sweep
//! over an explicit root set supplied by the VM. Collections only happen at
//! VM allocation points, never inside a native call.

pub mod collector;
pub mod heap;

pub use collector::{collect, GcStats};
pub use heap::{Heap, HeapConfig, HeapKind, HeapObj};
