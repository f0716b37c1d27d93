//! Error types for LinkDB
//!
//! Errors fall into a small taxonomy: model errors are raised while a
//! statement is compiled against the schema, rule errors are raised while
//! rows are written, and I/O errors come from the storage collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source location of a statement tree node, as byte offsets into the
/// original statement text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both spans.
    pub fn union(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Coarse error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Model,
    Rule,
    Io,
    Cancelled,
    Internal,
}

/// The main error type for LinkDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Model Errors ==========
    #[error("{}{}", location_prefix(.location), .message)]
    Model {
        message: String,
        location: Option<Span>,
    },

    // ========== Rule Errors ==========
    #[error("{message}")]
    Rule { name: String, message: String },

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== Execution Errors ==========
    #[error("Statement cancelled")]
    Cancelled,

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

fn location_prefix(location: &Option<Span>) -> String {
    match location {
        Some(span) => format!("{}: ", span),
        None => String::new(),
    }
}

impl Error {
    /// Model error without a source location
    pub fn model(message: impl Into<String>) -> Self {
        Error::Model {
            message: message.into(),
            location: None,
        }
    }

    /// Model error pointing at a statement tree node
    pub fn model_at(message: impl Into<String>, span: Span) -> Self {
        Error::Model {
            message: message.into(),
            location: Some(span),
        }
    }

    pub fn rule(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Rule {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Model { .. } => ErrorKind::Model,
            Error::Rule { .. } => ErrorKind::Rule,
            Error::Io(_) | Error::Serialization(_) => ErrorKind::Io,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn location(&self) -> Option<Span> {
        match self {
            Error::Model { location, .. } => *location,
            _ => None,
        }
    }

    /// Attaches a location to a model error that does not carry one yet.
    pub fn or_at(self, span: Span) -> Self {
        match self {
            Error::Model {
                message,
                location: None,
            } => Error::Model {
                message,
                location: Some(span),
            },
            other => other,
        }
    }
}

/// Result type alias for LinkDB operations
pub type Result<T> = std::result::Result<T, Error>;
