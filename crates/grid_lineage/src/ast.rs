//! Thin facade over the SQL parser.
//!
//! Only the first top-level statement of the input is ever considered. The
//! deparser is the AST's `Display` implementation, which round-trips parsed
//! statements modulo insignificant whitespace.

use sqlparser::ast::{Query, Select, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{LineageError, Result};

/// Parses SQL text into statements.
pub fn parse(sql: &str) -> Result<Vec<Statement>> {
    Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|err| LineageError::Parse(err.to_string()))
}

/// Renders a statement back to SQL text.
pub fn deparse(statement: &Statement) -> String {
    statement.to_string()
}

/// The query node of a statement, when it is one.
pub fn statement_query(statement: &Statement) -> Option<&Query> {
    match statement {
        Statement::Query(query) => Some(query),
        _ => None,
    }
}

/// The plain `SELECT` body of a query. Set operations and other bodies
/// return `None`; callers treat those as unsupported or pass-through.
pub fn query_select(query: &Query) -> Option<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Some(select),
        _ => None,
    }
}
