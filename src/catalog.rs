//! File identifier to table name resolution.
//!
//! A file named after a registered table goes straight to that table. Any
//! other identifier is looked up in the catalog, which is stored in the
//! `catalog_tables` table so operators can remap files without a release.

use std::{collections::BTreeMap, path::Path};

use log::debug;

use crate::{error::IngestError, schema::SchemaRegistry};

pub const CATALOG_TABLE: &str = "catalog_tables";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(file, table)| (file.into(), table.into()))
                .collect(),
        }
    }

    pub fn lookup(&self, file_name: &str) -> Option<&str> {
        self.entries.get(file_name).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(f, t)| (f.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, file_id: &str, registry: &SchemaRegistry) -> Result<String, IngestError> {
        if registry.contains(file_id) {
            return Ok(file_id.to_string());
        }
        match self.lookup(file_id) {
            Some(table) if registry.contains(table) => {
                debug!("Catalog maps '{file_id}' to table '{table}'");
                Ok(table.to_string())
            }
            Some(table) => Err(IngestError::unknown_table(table)),
            None => Err(IngestError::unknown_table(file_id)),
        }
    }
}

/// The identifier of a file is its stem: `uploads/jobs.csv` is `jobs`.
pub fn file_identifier(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .filter(|stem| !stem.is_empty())
}
