// Public modules
pub mod agent;
pub mod config;
pub mod deploy;
pub mod error;
pub mod ssh;
pub mod vcs;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
