//! Integration test infrastructure for Beacon CI.
//!
//! Wires a real dispatcher, in-memory store and in-process event bus around
//! a recording execution engine, so tests can drive changes end to end and
//! inspect what would have been built and reported.
//!
//! # Usage
//!
//! ```ignore
//! use beacon_tests::TestHarness;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::new();
//!     harness.dispatcher.handle_change(ChangeFixture::push_cpp("abc")).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,beacon_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
