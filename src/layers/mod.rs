//! Concrete [`Layer`](crate::layer::Layer) implementations.
//!
//! The two backing filesystems composed by [`UnionEngine`](crate::engine::UnionEngine) are out
//! of scope as *implementations* (see SPEC_FULL.md §1); [`disk`] provides the one concrete,
//! disk-backed implementation this crate needs to exercise and test the engine end-to-end.

pub mod disk;
