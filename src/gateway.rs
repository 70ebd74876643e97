//! Storage seam used by the reconciliation engine.
//!
//! A [`Storage`] hands out one [`TransactionScope`] per engine call. Every
//! gateway operation runs inside that scope; nothing is visible to other
//! connections until [`TransactionScope::commit`]. Dropping a scope without
//! committing rolls it back.

use crate::{
    data::Cell,
    error::IngestError,
    rows::{IdentityKey, RawRowSet, RowSet},
    schema::TableSchema,
};

pub trait TableGateway {
    /// Stored rows whose identity matches any of `keys`, with every declared
    /// column in schema order. One filtered read per call.
    fn select_by_identity(
        &self,
        table: &TableSchema,
        identity: &[String],
        keys: &[IdentityKey],
    ) -> Result<RawRowSet, IngestError>;

    fn insert_many(&self, table: &TableSchema, rows: &RowSet) -> Result<usize, IngestError>;

    /// Sets `columns` to `values` on rows matching `key`; returns rows modified.
    fn update_by_identity(
        &self,
        table: &TableSchema,
        identity: &[String],
        key: &IdentityKey,
        columns: &[String],
        values: &[Cell],
    ) -> Result<usize, IngestError>;

    fn delete_by_identity(
        &self,
        table: &TableSchema,
        identity: &[String],
        key: &IdentityKey,
    ) -> Result<usize, IngestError>;
}

pub trait TransactionScope: TableGateway {
    fn commit(self) -> Result<(), IngestError>;
}

pub trait Storage {
    type Scope<'a>: TransactionScope
    where
        Self: 'a;

    fn begin(&mut self) -> Result<Self::Scope<'_>, IngestError>;
}
