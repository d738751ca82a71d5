//! Completion backend access with retry and circuit breaking.

pub mod backend;
pub mod circuit;
pub mod client;

pub use backend::{CompletionBackend, CompletionRequest, HttpBackend};
pub use circuit::{CircuitBreaker, CircuitPolicy, CircuitState};
pub use client::{Completion, ResilientClient, RetryPolicy, TextStream};
