//! Error kinds surfaced by the lineage core.
//!
//! The display strings of the client-facing variants are part of the wire
//! contract: subscribers see them verbatim inside `error` frames.

use thiserror::Error;

/// Errors produced by parsing, provenance resolution, rewriting, and the
/// edit-handle codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineageError {
    /// The SQL text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The input contained no statements at all.
    #[error("no statements")]
    Empty,

    /// A statement other than a plain `SELECT` was submitted.
    #[error("only SELECT supported")]
    Unsupported,

    /// A qualified column referenced an alias that is not in scope.
    #[error("alias {0} not found")]
    AliasNotFound(String),

    /// An unqualified column matched zero or several base tables.
    #[error("ambiguous column {0}")]
    AmbiguousColumn(String),

    /// An edit handle failed to decode.
    #[error("invalid handle: {0}")]
    Handle(String),

    /// A catalog snapshot could not be loaded or decoded.
    #[error("catalog error: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, LineageError>;
