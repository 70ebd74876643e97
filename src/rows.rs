//! Row sets before and after coercion, and identity extraction.
//!
//! A [`RawRowSet`] carries loosely typed [`RawValue`] cells straight from a
//! CSV file or a storage read. Coercion turns it into a [`RowSet`] whose
//! cells match their declared column types or are `None`. Identity keys are
//! taken from coerced rows only, so `"7"` and `7.0` name the same record.

use serde::Serialize;

use crate::{
    data::{Cell, RawValue},
    error::IngestError,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawRowSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a row set from text fields, treating empty fields as absent.
    pub fn from_fields<S: AsRef<str>>(columns: &[&str], rows: &[Vec<S>]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|field| RawValue::from_field(field.as_ref()))
                        .collect()
                })
                .collect(),
        }
    }

    pub fn push(&mut self, row: Vec<RawValue>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub type Row = Vec<Cell>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Positions of `names` within this row set, in the order given.
    pub fn positions(&self, table: &str, names: &[String]) -> Result<Vec<usize>, IngestError> {
        names
            .iter()
            .map(|name| {
                self.column_index(name).ok_or_else(|| {
                    IngestError::schema_mismatch(
                        table,
                        format!("column '{name}' is missing from the row set"),
                    )
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub fn get(&self, row: usize, column: &str) -> Option<&crate::data::Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }
}

/// Ordered identity column values of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(pub Vec<Cell>);

impl IdentityKey {
    pub fn from_row(row: &[Cell], positions: &[usize]) -> Self {
        IdentityKey(
            positions
                .iter()
                .map(|&idx| row.get(idx).cloned().flatten())
                .collect(),
        )
    }

    pub fn values(&self) -> &[Cell] {
        &self.0
    }

    /// SQL equality never matches `NULL`, so such keys never find a stored row.
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Option::is_none)
    }

    pub fn describe(&self) -> String {
        let parts = self
            .0
            .iter()
            .map(|cell| match cell {
                Some(value) => value.as_display(),
                None => "null".to_string(),
            })
            .collect::<Vec<_>>();
        format!("({})", parts.join(", "))
    }
}
