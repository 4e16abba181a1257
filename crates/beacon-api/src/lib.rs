//! HTTP API server for Beacon CI.
//!
//! Receives GitHub webhooks, exposes operator endpoints (force builds,
//! inspect and cancel jobs) and the callbacks the execution engine uses to
//! report job progress.

pub mod engine;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod webhook;

pub use engine::HttpExecutionEngine;
pub use routes::{create_router, serve};
pub use state::AppState;
