//! Deterministic, pure logic shared by the repair runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod label;
pub mod naming;
pub mod types;
