//! Error types for code generation.
//!
//! The code generator trusts its input to be fully analyzed; anything
//! malformed that reaches it is an internal compiler bug and aborts via an
//! assertion. The only recoverable failure is the final assembly step.

use std::fmt;

#[derive(Debug)]
pub enum CodegenError {
    /// Assembling an image to bytes failed (e.g. an unresolvable mark).
    Assembly(String),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::Assembly(message) => write!(f, "assembly failed: {message}"),
        }
    }
}

impl std::error::Error for CodegenError {}

/// Result type for code generation operations.
pub type Result<T> = std::result::Result<T, CodegenError>;
