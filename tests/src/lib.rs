//! # Ebus Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/  # Multi-node flows through the public API
//! │   ├── request_response.rs
//! │   ├── delivery.rs
//! │   └── lifecycle.rs
//! └── benches/          # Router throughput (criterion)
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ebus-tests
//! cargo test -p ebus-tests integration::request_response
//! cargo bench -p ebus-tests
//! ```

#![allow(dead_code)]

pub mod integration;
