//! Navigator SDK
//!
//! Shared error taxonomy and session vocabulary for the navigator engine.
//! Callers (CLI, HTTP front ends) depend on this crate to interpret run reports
//! without pulling in the engine itself.

/// Error types and handling
pub mod errors;

/// Session states, failure reasons and step statuses
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt, ErrorKind};
pub use types::{FailureReason, SessionState, StepStatus};
