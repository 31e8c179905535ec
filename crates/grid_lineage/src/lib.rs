//! grid_lineage — SQL lineage core for live editable result sets.
//!
//! Pure, IO-free building blocks consumed by the `grid_live` server:
//!
//! - [`catalog`]: schema snapshot model with the shared lookup fallback.
//! - [`ast`]: parse/deparse facade over the SQL parser.
//! - [`resolver`]: per-output-column provenance back to base-table columns.
//! - [`rewrite`]: primary-key injection rewrite of `SELECT` statements.
//! - [`handle`]: opaque edit-handle codec for row-level reverse pointers.

pub mod ast;
pub mod catalog;
pub mod error;
pub mod handle;
pub mod resolver;
pub mod rewrite;

pub use catalog::{Catalog, ColumnDef, SchemaSnapshot, TableDef};
pub use error::LineageError;
pub use handle::{decode_handle, encode_handle, EditTarget};
pub use resolver::{resolve_provenance, split_source, Provenance};
pub use rewrite::{rewrite_inject_pks, RewriteOutcome};
