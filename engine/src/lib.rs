//! Navigator Engine Library
//!
//! Multi-model web navigation: a planner, a coder and a reasoner drive a
//! WebDriver session toward a goal while a semantic memory records what
//! they learn. Used by the `navigator` binary and the integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Language model gateway and providers
pub mod llm;

/// Browser driver contract, action vocabulary and WebDriver client
pub mod browser;

/// Semantic memory and embeddings
pub mod memory;

/// Database persistence module
pub mod db;

/// Conductor orchestration module
pub mod conductor;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
