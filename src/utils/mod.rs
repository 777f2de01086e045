//! Generic utility primitives with zero domain knowledge.
//!
//! - `shell` - Shell escaping, quoting and command chaining
//! - `validation` - Input validation helpers

pub mod shell;
pub mod validation;
