//! Ask an ERP in plain words: deterministic routing for common analytics,
//! a model-backed planner for the rest, and gated execution of the
//! resulting tool calls.

pub mod config;
pub mod dates;
pub mod docs;
pub mod error;
pub mod executor;
pub mod llm;
pub mod planner;
pub mod presets;
pub mod router;
pub mod safety;
pub mod tools;
pub mod types;

pub use executor::Agent;
pub use types::{Command, ExecutionResult, Intent, Plan, Status, Step, StepOutcome};
