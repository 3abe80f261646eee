//! Deterministic, pure logic shared by the runtime.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod inline;
pub mod plan;
pub mod scope;
pub mod suggestions;
pub mod types;
