#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_ingest::rows::RawRowSet;
use csv_ingest::schema::SchemaRegistry;
use csv_ingest::store::SqliteStore;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn database(&self) -> PathBuf {
        self.temp_dir.path().join("hiring.db")
    }
}

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::builtin().expect("built-in schema")
}

/// In-memory store with every hiring table created.
pub fn hiring_store(registry: &SchemaRegistry) -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    store.create_tables(registry).expect("create tables");
    store
}

pub fn employees(rows: &[[&str; 5]]) -> RawRowSet {
    RawRowSet::from_fields(
        &["id", "name", "datetime", "department_id", "job_id"],
        &rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>(),
    )
}

pub fn employee_ids() -> Vec<String> {
    vec!["id".to_string()]
}

/// Stored `hired_employees` rows as text, ordered by id.
pub fn stored_employees(store: &SqliteStore) -> Vec<(i64, Option<String>, Option<String>)> {
    let mut stmt = store
        .connection()
        .prepare("SELECT id, name, datetime FROM hired_employees ORDER BY id")
        .expect("prepare select");
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .expect("query employees")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect employees")
}

pub fn count(store: &SqliteStore, table: &str) -> usize {
    store.count_rows(table).expect("count rows")
}
