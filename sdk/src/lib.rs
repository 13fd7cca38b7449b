//! Strata SDK
//!
//! Shared library providing the types every Strata component and agent
//! implementation agrees on: results, configuration, capabilities and errors.

/// Provider capability flags
pub mod capability;

/// Error types and handling
pub mod errors;

/// Agent result and configuration types
pub mod types;

// Re-export commonly used types
pub use capability::{Capability, CapabilitySet};
pub use errors::{EngineError, ErrorExt};
pub use types::{AgentConfig, AgentMetadata, AgentResult, ConfigOverrides, Validation};
