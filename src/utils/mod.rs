//! The `utils` module collects the pieces every other module leans on:
//! the crate-wide error type and the tracing subscriber setup.

pub mod error;
pub mod logging;
