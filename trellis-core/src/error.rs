//! Error types for the reactive runtime.
//!
//! Tracking and triggering never fail. Errors only surface from the value
//! layer (typed reads, JSON ingress) and from option parsing.

use thiserror::Error;

/// Errors produced by the fallible parts of the runtime API.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A field held a value of a different type than the one requested.
    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// JSON ingress was given something other than an object at the top level.
    #[error("a tracked object can only be built from a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A flush mode string was neither `sync` nor `post`.
    #[error("unknown flush mode '{0}', expected 'sync' or 'post'")]
    InvalidFlushMode(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;
