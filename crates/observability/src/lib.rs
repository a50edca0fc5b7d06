//! Tracing/logging setup shared by every process embedding the auth core.

pub mod tracing;

pub use crate::tracing::{LogFormat, ObservabilityConfig, init, try_init};
