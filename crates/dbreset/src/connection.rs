//! Database access seams
//!
//! The reset utility only needs four things from a database: the driver
//! name, the default schema, statement execution and simple queries. Those
//! live behind [`Connection`] so any driver binding can plug in.

use std::fmt;
use testkit_core::{Error, Result};

/// A single value read from a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL `NULL`
    Null,
    /// Integer column
    Long(i64),
    /// Character column
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Long(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// One row of a result set, columns in select order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.columns.push((column.into(), value.into()));
        self
    }

    /// Value of `column`, matched case-insensitively like SQL identifiers.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Text value of `column`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the column is missing or not text.
    pub fn text(&self, column: &str) -> Result<&str> {
        match self.get(column) {
            Some(SqlValue::Text(value)) => Ok(value),
            Some(other) => Err(Error::Database(format!(
                "Column '{}' is not text: {:?}",
                column, other
            ))),
            None => Err(Error::Database(format!("Missing column '{}'", column))),
        }
    }

    /// Integer value of the column at `index`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the index is out of range or the value
    /// is not an integer.
    pub fn long_at(&self, index: usize) -> Result<i64> {
        match self.columns.get(index) {
            Some((_, SqlValue::Long(value))) => Ok(*value),
            Some((name, other)) => Err(Error::Database(format!(
                "Column '{}' is not an integer: {:?}",
                name, other
            ))),
            None => Err(Error::Database(format!("Missing column {}", index))),
        }
    }
}

/// An open database connection. Dropping it closes the connection.
pub trait Connection {
    /// Name of the driver behind this connection, e.g. `H2 JDBC Driver`.
    fn driver_name(&mut self) -> Result<String>;

    /// Schema unqualified names resolve against.
    fn schema(&mut self) -> Result<String>;

    /// Executes a statement that returns no rows.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the statement fails.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Runs a query and returns all rows.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the query fails.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>>;
}

/// Hands out connections to one database.
///
/// Thread safety: implementations are shared between tests and must be
/// `Send + Sync`.
pub trait DataSource: Send + Sync {
    /// Connection type produced by this source.
    type Connection: Connection;

    /// Opens a connection.
    fn connection(&self) -> Result<Self::Connection>;
}

/// A table identified by schema and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    name: String,
    schema: String,
}

impl Table {
    /// Table `name` in `schema`.
    pub fn new(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
        }
    }

    /// Unqualified table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema of the table.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Qualified identifier `schema.name`.
    pub fn to_sql(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A table-backed id generator declared on an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableGenerator {
    /// Table holding the generator's `next_val`; must not be empty.
    pub table: String,
    /// Schema of that table; `None` means the connection's default schema.
    pub schema: Option<String>,
}

impl TableGenerator {
    /// Generator backed by `table` in the default schema.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
        }
    }

    /// Places the generator table in `schema`.
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// Entity model of the application under test.
pub trait EntityMetadata: Send + Sync {
    /// Names of all mapped entities.
    fn entities(&self) -> Vec<String>;

    /// Table generators declared on `entity` and its supertypes.
    fn table_generators(&self, entity: &str) -> Vec<TableGenerator>;
}
