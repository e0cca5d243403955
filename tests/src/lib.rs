//! # Record Bus Test Suite
//!
//! Cross-crate scenarios exercising the bus end to end against the
//! in-memory broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Recording handlers and bus builders
//! └── integration/
//!     ├── lifecycle.rs   # subscribe → publish → unsubscribe flows
//!     ├── isolation.rs   # provisioning, handler and serialization failures
//!     └── noop.rs        # no-op bus behaviour
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p record-tests
//! cargo test -p record-tests integration::isolation::
//! ```

pub mod fixtures;
pub mod integration;
