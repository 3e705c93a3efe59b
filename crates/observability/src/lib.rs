//! Process-wide tracing/logging setup.

pub mod subscriber;

pub use subscriber::{LogFormat, init, init_with};
