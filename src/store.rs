//! SQLite-backed storage: the table gateway, table creation, the catalog
//! table, and the schema drift diagnostic.
//!
//! Table and column names come from the validated schema registry and are
//! always double-quoted; values are always bound parameters.

use std::{collections::BTreeSet, fmt, path::Path, time::Duration};

use itertools::Itertools;
use log::{debug, info};
use rusqlite::{
    Connection, OptionalExtension, Row as SqlRow, ToSql, Transaction, TransactionBehavior,
    params, params_from_iter,
    types::{ToSqlOutput, ValueRef},
};

use crate::{
    catalog::{CATALOG_TABLE, Catalog},
    data::{Cell, RawValue, TIMESTAMP_FORMAT, Value},
    error::IngestError,
    gateway::{Storage, TableGateway, TransactionScope},
    rows::{IdentityKey, RawRowSet, RowSet},
    schema::{SchemaRegistry, TableSchema},
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// SQLITE_MAX_VARIABLE_NUMBER for the bundled library.
const MAX_BIND_PARAMETERS: usize = 32_766;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Timestamp(ts) => ToSqlOutput::from(ts.format(TIMESTAMP_FORMAT).to_string()),
        })
    }
}

impl From<ValueRef<'_>> for RawValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => RawValue::Null,
            ValueRef::Integer(i) => RawValue::Integer(i),
            ValueRef::Real(f) => RawValue::Real(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                RawValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, IngestError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Creates every registered table that does not exist yet.
    pub fn create_tables(&self, registry: &SchemaRegistry) -> Result<usize, IngestError> {
        for table in &registry.tables {
            debug!("Ensuring table '{}'", table.name);
            self.conn.execute_batch(&table.create_statement())?;
        }
        info!(
            "Schema version {} applied ({} table(s))",
            registry.version(),
            registry.tables.len()
        );
        Ok(registry.tables.len())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, IngestError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Reads the catalog table; a database without one has an empty catalog.
    pub fn load_catalog(&self) -> Result<Catalog, IngestError> {
        if !self.table_exists(CATALOG_TABLE)? {
            return Ok(Catalog::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT \"file_name\", \"table_name\" FROM \"{CATALOG_TABLE}\" ORDER BY \"id\""
        ))?;
        let entries = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Catalog::from_entries(entries))
    }

    /// Maps `file_name` to `table_name`, replacing any previous mapping.
    pub fn set_catalog_entry(&mut self, file_name: &str, table_name: &str) -> Result<(), IngestError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            &format!("UPDATE \"{CATALOG_TABLE}\" SET \"table_name\" = ?1 WHERE \"file_name\" = ?2"),
            params![table_name, file_name],
        )?;
        if updated == 0 {
            tx.execute(
                &format!(
                    "INSERT INTO \"{CATALOG_TABLE}\" (\"id\", \"table_name\", \"file_name\") \
                     VALUES ((SELECT COALESCE(MAX(\"id\"), 0) + 1 FROM \"{CATALOG_TABLE}\"), ?1, ?2)"
                ),
                params![table_name, file_name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn remove_catalog_entry(&mut self, file_name: &str) -> Result<usize, IngestError> {
        Ok(self.conn.execute(
            &format!("DELETE FROM \"{CATALOG_TABLE}\" WHERE \"file_name\" = ?1"),
            params![file_name],
        )?)
    }

    pub fn count_rows(&self, table: &str) -> Result<usize, IngestError> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Compares the registry with the live database. Diagnostic only.
    pub fn schema_drift(&self, registry: &SchemaRegistry) -> Result<Vec<SchemaDrift>, IngestError> {
        let mut issues = Vec::new();
        for table in &registry.tables {
            if !self.table_exists(&table.name)? {
                issues.push(SchemaDrift::MissingTable {
                    table: table.name.clone(),
                });
                continue;
            }
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA table_info(\"{}\")", table.name))?;
            let live = stmt
                .query_map([], |row| {
                    Ok(LiveColumn {
                        name: row.get(1)?,
                        declared_type: row.get(2)?,
                        not_null: row.get::<_, i64>(3)? != 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for column in &table.columns {
                let Some(found) = live.iter().find(|l| l.name == column.name) else {
                    issues.push(SchemaDrift::MissingColumn {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                    continue;
                };
                let expected = column.datatype.sql_type();
                if !found.declared_type.eq_ignore_ascii_case(expected) {
                    issues.push(SchemaDrift::TypeMismatch {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        expected: expected.to_string(),
                        found: found.declared_type.clone(),
                    });
                }
                if found.not_null == column.nullable {
                    issues.push(SchemaDrift::NullabilityMismatch {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        expected_nullable: column.nullable,
                    });
                }
            }
            for extra in live.iter().filter(|l| table.column(&l.name).is_none()) {
                issues.push(SchemaDrift::UndeclaredColumn {
                    table: table.name.clone(),
                    column: extra.name.clone(),
                });
            }
        }
        Ok(issues)
    }
}

struct LiveColumn {
    name: String,
    declared_type: String,
    not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDrift {
    MissingTable {
        table: String,
    },
    MissingColumn {
        table: String,
        column: String,
    },
    UndeclaredColumn {
        table: String,
        column: String,
    },
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        found: String,
    },
    NullabilityMismatch {
        table: String,
        column: String,
        expected_nullable: bool,
    },
}

impl fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaDrift::MissingTable { table } => write!(f, "table '{table}' is missing"),
            SchemaDrift::MissingColumn { table, column } => {
                write!(f, "column '{table}.{column}' is missing")
            }
            SchemaDrift::UndeclaredColumn { table, column } => {
                write!(f, "column '{table}.{column}' is not declared in the schema")
            }
            SchemaDrift::TypeMismatch {
                table,
                column,
                expected,
                found,
            } => write!(
                f,
                "column '{table}.{column}' has type '{found}' but '{expected}' is declared"
            ),
            SchemaDrift::NullabilityMismatch {
                table,
                column,
                expected_nullable,
            } => {
                let expected = if *expected_nullable { "nullable" } else { "NOT NULL" };
                write!(f, "column '{table}.{column}' should be {expected}")
            }
        }
    }
}

impl Storage for SqliteStore {
    type Scope<'a> = SqliteScope<'a>;

    /// `IMMEDIATE` takes the write lock before the candidate read, so the
    /// read and the writes of one call see the same snapshot.
    fn begin(&mut self) -> Result<Self::Scope<'_>, IngestError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteScope { tx })
    }
}

pub struct SqliteScope<'conn> {
    tx: Transaction<'conn>,
}

impl TransactionScope for SqliteScope<'_> {
    fn commit(self) -> Result<(), IngestError> {
        self.tx.commit()?;
        Ok(())
    }
}

impl TableGateway for SqliteScope<'_> {
    fn select_by_identity(
        &self,
        table: &TableSchema,
        identity: &[String],
        keys: &[IdentityKey],
    ) -> Result<RawRowSet, IngestError> {
        let mut result = RawRowSet::new(table.headers());
        let distinct = keys
            .iter()
            .filter(|key| !key.has_null())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        if distinct.is_empty() || identity.is_empty() {
            return Ok(result);
        }

        let per_query = (MAX_BIND_PARAMETERS / identity.len()).max(1);
        for chunk in distinct.chunks(per_query) {
            let sql = select_sql(table, identity, chunk.len());
            let mut stmt = self.tx.prepare_cached(&sql)?;
            let values = chunk.iter().flat_map(|key| key.values().iter());
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    decode_row(row, table.columns.len())
                })?
                .collect::<Result<Vec<_>, _>>()?;
            result.rows.extend(rows);
        }
        debug!(
            "Selected {} stored row(s) from '{}' for {} identity key(s)",
            result.len(),
            table.name,
            distinct.len()
        );
        Ok(result)
    }

    fn insert_many(&self, table: &TableSchema, rows: &RowSet) -> Result<usize, IngestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = rows.columns.iter().map(|c| quote(c)).join(", ");
        let placeholders = std::iter::repeat_n("?", rows.columns.len()).join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            quote(&table.name)
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut inserted = 0usize;
        for row in &rows.rows {
            inserted += stmt.execute(params_from_iter(row.iter()))?;
        }
        Ok(inserted)
    }

    fn update_by_identity(
        &self,
        table: &TableSchema,
        identity: &[String],
        key: &IdentityKey,
        columns: &[String],
        values: &[Cell],
    ) -> Result<usize, IngestError> {
        if columns.is_empty() {
            return Ok(0);
        }
        let assignments = columns.iter().map(|c| format!("{} = ?", quote(c))).join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {}",
            quote(&table.name),
            identity_predicate(identity)
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let bound = values.iter().chain(key.values().iter());
        Ok(stmt.execute(params_from_iter(bound))?)
    }

    fn delete_by_identity(
        &self,
        table: &TableSchema,
        identity: &[String],
        key: &IdentityKey,
    ) -> Result<usize, IngestError> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote(&table.name),
            identity_predicate(identity)
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;
        Ok(stmt.execute(params_from_iter(key.values().iter()))?)
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn identity_predicate(identity: &[String]) -> String {
    identity
        .iter()
        .map(|c| format!("{} = ?", quote(c)))
        .join(" AND ")
}

fn select_sql(table: &TableSchema, identity: &[String], key_count: usize) -> String {
    let columns = table.columns.iter().map(|c| quote(&c.name)).join(", ");
    let filter = if identity.len() == 1 {
        let placeholders = std::iter::repeat_n("?", key_count).join(", ");
        format!("{} IN ({placeholders})", quote(&identity[0]))
    } else {
        let tuple = format!("({})", std::iter::repeat_n("?", identity.len()).join(", "));
        let tuples = std::iter::repeat_n(tuple.as_str(), key_count).join(", ");
        format!(
            "({}) IN (VALUES {tuples})",
            identity.iter().map(|c| quote(c)).join(", ")
        )
    };
    format!(
        "SELECT {columns} FROM {} WHERE {filter}",
        quote(&table.name)
    )
}

fn decode_row(row: &SqlRow<'_>, width: usize) -> rusqlite::Result<Vec<RawValue>> {
    (0..width)
        .map(|idx| row.get_ref(idx).map(RawValue::from))
        .collect()
}
