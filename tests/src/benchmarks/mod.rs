//! # Benchmarks
//!
//! Criterion benchmarks for the request/reply correlation engine.

pub mod correlation;
