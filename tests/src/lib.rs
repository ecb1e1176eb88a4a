//! # Courier-MQ Test Suite
//!
//! Cross-crate tests that run the broker runtime against a real paging
//! directory.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── paging_benchmarks.rs  # Paging and chunking throughput
//! └── src/integration/
//!     ├── flows.rs              # Large messages through paged addresses
//!     └── recovery.rs           # XA branches across restarts
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mq-tests
//! cargo test -p mq-tests integration::recovery
//! cargo bench -p mq-tests
//! ```

pub mod integration;
