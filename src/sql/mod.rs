//! SQL dialect used to define tables and to query them.
//!
//! ```text
//! SELECT <fields> FROM <table> [ASOF '<duration>'] [UNTIL '<duration>'] | FROM (<select>)
//! [WHERE <expr>]
//! [GROUP BY * | <expr> [AS name], ... [, CROSSTAB(<expr>)] [, period('<duration>')]]
//! [HAVING <expr>]
//! [ORDER BY <field> [ASC|DESC], ...]
//! [LIMIT [<offset>,] <count>]
//! ```
//!
//! Compilation resolves every identifier and function call up front, so a compiled
//! [`Query`] never refers to an unknown table or function.

mod compiler;
pub mod duration;
mod lexer;
mod parser;
mod query;

pub use compiler::{Compiler, FieldSource};
pub use query::{Field, GroupBy, OrderBy, Query, QuerySource};

use crate::error::DbError;
use crate::expr::FunctionRegistry;

/// Compiles `text` into a [`Query`], looking up known fields of tables through
/// `field_source`.
pub fn parse(text: &str, functions: &FunctionRegistry, field_source: &dyn FieldSource) -> Result<Query, DbError> {
    Compiler::new(text, functions, field_source).compile()
}

/// Canonical form of stream, table and identifier names.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
