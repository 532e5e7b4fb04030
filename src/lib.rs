#![doc = include_str!("../README.md")]
// Declare modules
pub mod bytemap;
pub mod clock;
pub mod codec;
pub mod config;
pub mod core;
pub mod encoding;
pub mod error;
pub mod expr;
pub mod persistence;
pub mod sql;
pub mod storage;
pub mod table;
pub mod telemetry;
pub mod types;

/// Sorted binary map used for dimensions, values and group keys.
pub use crate::bytemap::ByteMap;
/// Configuration options for the database core.
pub use crate::core::DbConfig;
/// Main entry point: streams, tables and query compilation.
pub use crate::core::Db;
/// Error type for database operations.
pub use crate::error::DbError;
/// Expression tree and the registry of callable functions.
pub use crate::expr::{Expr, FunctionRegistry};
/// Append log contract and its file-backed implementation.
pub use crate::persistence::{AppendLog, LogReader, WriteAheadLog};
/// Compiled query and its parts.
pub use crate::sql::{Field, GroupBy, Query};
/// In-memory row store.
pub use crate::storage::MemRowStore;
/// Tables and the row store they feed.
pub use crate::table::{RowStore, Table, TableOptions};
/// Structured event hook for observability.
pub use crate::telemetry::{DbEvent, DbEventListener};
/// Point, record and counter types.
pub use crate::types::{Dims, InsertRecord, LogOffset, Point, Scalar, TableStats, Timestamp, Vals, Value};
