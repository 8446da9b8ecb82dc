//! # Broker Samples Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Criterion benchmarks of the correlation engine
//! │   └── correlation.rs
//! │
//! └── integration/      # Cross-crate flows against the in-memory broker
//!     ├── request_reply.rs
//!     └── broker_flows.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mq-tests
//!
//! # By category
//! cargo test -p mq-tests integration::request_reply::
//! cargo test -p mq-tests integration::broker_flows::
//!
//! # Benchmarks
//! cargo bench -p mq-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod benchmarks;
