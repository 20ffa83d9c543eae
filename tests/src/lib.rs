//! # naevis Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs    # Recording store double and in-process app
//!     ├── pipeline.rs   # Decorator chains driven through the router
//!     └── lifecycle.rs  # Serve, drain and shutdown over real sockets
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p naevis-tests
//! cargo test -p naevis-tests integration::pipeline::
//! ```

pub mod integration;
