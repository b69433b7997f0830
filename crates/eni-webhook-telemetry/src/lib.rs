//! Logging setup shared by the ENI IP webhook binaries.
//!
//! See [`tracing::Tracing`] to get started.
pub mod tracing;
