//! Beacon CI Core
//!
//! Core domain types, traits, and error handling for Beacon CI.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the scheduler, the reporters, and the HTTP surface.

pub mod builder;
pub mod change;
pub mod environment;
pub mod error;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod job;
pub mod ports;
pub mod reporting;
pub mod secrets;
pub mod worker;

pub use error::{ConfigError, ConfigErrors, Error, Result};
pub use ids::*;
