//! Input validation primitives.
//!
//! Provides ergonomic helpers for common validation patterns:
//! - Validating non-empty strings and collections
//! - Parsing a value against a closed set of names
//!
//! Each helper takes the error to return lazily, so callers keep full
//! control over the error code and details.

use crate::error::{Error, Result};

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, err: impl FnOnce() -> Error) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(err())
    } else {
        Ok(trimmed)
    }
}

/// Require a collection to be non-empty.
pub fn require_non_empty_vec<'a, T>(vec: &'a [T], err: impl FnOnce() -> Error) -> Result<&'a [T]> {
    if vec.is_empty() {
        Err(err())
    } else {
        Ok(vec)
    }
}

/// Require a value to parse into `T`, mapping any parse failure to `err`.
pub fn require_parse<T: std::str::FromStr>(value: &str, err: impl FnOnce() -> Error) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| err())
}
