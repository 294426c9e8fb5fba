//! Deterministic, pure logic shared by the refinement engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod cancel;
pub mod classifier;
pub mod target;
pub mod types;
