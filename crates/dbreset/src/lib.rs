//! Database reset for testkit
//!
//! Puts an embedded H2 database back into an empty state between tests:
//! - DatabaseReset: truncate tables, reset generator tables, restart sequences
//! - Connection / DataSource: the seam a driver binding implements
//! - EntityMetadata: where table-backed id generators are declared

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod reset;

pub use connection::{Connection, DataSource, EntityMetadata, Row, SqlValue, Table, TableGenerator};
pub use reset::{table_names, DatabaseReset, TableFilter, H2_JDBC_DRIVER};
