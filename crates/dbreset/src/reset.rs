//! Resetting an embedded H2 database between tests.

use crate::connection::{Connection, DataSource, EntityMetadata, Table, TableGenerator};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use testkit_core::{Error, Result};
use tracing::{debug, trace};

/// Driver name the reset refuses to run without.
pub const H2_JDBC_DRIVER: &str = "H2 JDBC Driver";

/// Lists every user table of an H2 1.4 or 2.x database.
pub const SELECT_ALL_TABLES: &str = "SELECT * FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_TYPE IN ('TABLE' /* h2 v1.4 */, 'BASE TABLE' /* h2 v2.x */) \
     AND TABLE_SCHEMA NOT IN ('INFORMATION_SCHEMA', 'PG_CATALOG')";

/// Lists every sequence.
pub const SELECT_ALL_SEQUENCES: &str = "SELECT SEQUENCE_NAME FROM INFORMATION_SCHEMA.SEQUENCES";

/// Predicate over a qualified `schema.table` identifier.
pub type TableFilter<'a> = &'a dyn Fn(&str) -> bool;

/// Wipes an H2 database back to an empty state between tests.
///
/// Tables are truncated, table-backed id generators get `next_val = 0`
/// and sequences restart at 1. Without a data source every operation
/// is a no-op.
pub struct DatabaseReset<D: DataSource> {
    data_source: Option<D>,
    entities: Option<Arc<dyn EntityMetadata>>,
    generators: Mutex<HashMap<String, Vec<TableGenerator>>>,
}

impl<D: DataSource> DatabaseReset<D> {
    /// Reset over `data_source`.
    pub fn new(data_source: D) -> Self {
        Self::from_option(Some(data_source))
    }

    /// Reset without a database; every operation succeeds without effect.
    pub fn disabled() -> Self {
        Self::from_option(None)
    }

    fn from_option(data_source: Option<D>) -> Self {
        Self {
            data_source,
            entities: None,
            generators: Mutex::new(HashMap::new()),
        }
    }

    /// Entity model whose table generators are reset instead of truncated.
    pub fn with_entity_metadata(mut self, entities: Arc<dyn EntityMetadata>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// `true` if a data source is configured.
    pub fn is_enabled(&self) -> bool {
        self.data_source.is_some()
    }

    /// Truncates all tables not matched by `excludes` and restarts all
    /// sequences.
    ///
    /// Each filter sees the qualified `schema.table` identifier, e.g.
    /// `|table: &str| table.to_lowercase().starts_with("public.databasechangelog")`
    /// keeps a Liquibase changelog.
    ///
    /// # Errors
    ///
    /// - `Error::Unsupported` if the database is not H2 or a table generator
    ///   has an empty table name
    /// - `Error::Database` if a statement fails
    pub fn reset_database(&self, excludes: &[TableFilter<'_>]) -> Result<()> {
        let data_source = match &self.data_source {
            Some(data_source) => data_source,
            None => return Ok(()),
        };
        let sequence_tables = self.collect_sequence_tables(data_source)?;
        let mut connection = data_source.connection()?;
        assert_is_h2(&mut connection)?;
        truncate_all_tables(&mut connection, &sequence_tables, excludes)?;
        reset_all_sequences(&mut connection)
    }

    /// Drops every object in the database.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` if the database is not H2.
    pub fn drop_all_objects(&self) -> Result<()> {
        let data_source = match &self.data_source {
            Some(data_source) => data_source,
            None => return Ok(()),
        };
        let mut connection = data_source.connection()?;
        assert_is_h2(&mut connection)?;
        connection.execute("DROP ALL OBJECTS")
    }

    fn collect_sequence_tables(&self, data_source: &D) -> Result<Vec<Table>> {
        let entities = match &self.entities {
            Some(entities) => entities,
            None => return Ok(Vec::new()),
        };
        let default_schema = data_source.connection()?.schema()?;

        let mut tables = Vec::new();
        for entity in entities.entities() {
            let generators = {
                let mut cache = self.generators.lock();
                cache
                    .entry(entity.clone())
                    .or_insert_with(|| entities.table_generators(&entity))
                    .clone()
            };
            for generator in generators {
                if generator.table.is_empty() {
                    return Err(Error::Unsupported(
                        "Empty TableGenerator table name is not supported. \
                         Please specify table name explicitly"
                            .to_string(),
                    ));
                }
                let schema = generator
                    .schema
                    .filter(|schema| !schema.is_empty())
                    .unwrap_or_else(|| default_schema.clone());
                let table = Table::new(generator.table, schema);
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
        }
        Ok(tables)
    }
}

fn assert_is_h2<C: Connection>(connection: &mut C) -> Result<()> {
    let driver = connection.driver_name()?;
    if driver == H2_JDBC_DRIVER {
        Ok(())
    } else {
        Err(Error::Unsupported(format!("Unexpected driver: {}", driver)))
    }
}

fn truncate_all_tables<C: Connection>(
    connection: &mut C,
    sequence_tables: &[Table],
    excludes: &[TableFilter<'_>],
) -> Result<()> {
    connection.execute("SET REFERENTIAL_INTEGRITY FALSE")?;

    let sequence_tables: HashSet<String> = sequence_tables
        .iter()
        .map(|table| table.to_sql().to_lowercase())
        .collect();

    for table in table_names(connection)? {
        let identifier = table.to_sql();
        if excludes.iter().any(|exclude| exclude(identifier.as_str())) {
            trace!(target: "testkit::dbreset", "Excluding '{}' from reset", identifier);
            continue;
        }
        let count = select_count(connection, &table)?;
        if sequence_tables.contains(&identifier.to_lowercase()) {
            if count > 0 {
                debug!(target: "testkit::dbreset", "Resetting {} sequence{} in table '{}'", count, plural(count), identifier);
            }
            connection.execute(&format!("UPDATE {} SET next_val = 0", identifier))?;
        } else {
            if count > 0 {
                debug!(target: "testkit::dbreset", "Deleting {} row{} from table '{}'", count, plural(count), identifier);
            }
            connection.execute(&format!("TRUNCATE TABLE {} RESTART IDENTITY", identifier))?;
        }
    }

    connection.execute("SET REFERENTIAL_INTEGRITY TRUE")
}

fn reset_all_sequences<C: Connection>(connection: &mut C) -> Result<()> {
    let sequences = connection
        .query(SELECT_ALL_SEQUENCES)?
        .iter()
        .map(|row| row.text("SEQUENCE_NAME").map(str::to_string))
        .collect::<Result<Vec<_>>>()?;
    for sequence in sequences {
        connection.execute(&format!("ALTER SEQUENCE {} RESTART WITH 1", sequence))?;
    }
    Ok(())
}

/// All user tables, in the order the database lists them.
pub fn table_names<C: Connection>(connection: &mut C) -> Result<Vec<Table>> {
    let mut tables = Vec::new();
    for row in connection.query(SELECT_ALL_TABLES)? {
        let table = Table::new(row.text("TABLE_NAME")?, row.text("TABLE_SCHEMA")?);
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    Ok(tables)
}

fn select_count<C: Connection>(connection: &mut C, table: &Table) -> Result<i64> {
    let rows = connection.query(&format!("SELECT COUNT(*) FROM {}", table.to_sql()))?;
    match rows.as_slice() {
        [row] => row.long_at(0),
        _ => Err(Error::Database("Expected exactly one result".to_string())),
    }
}

fn plural(count: i64) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
