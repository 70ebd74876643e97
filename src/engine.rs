//! Record reconciliation.
//!
//! [`Engine::reconcile`] compares an incoming row set with what is stored,
//! keyed by a caller-supplied identity column set, and applies the smallest
//! set of writes that makes storage match:
//!
//! | new | changed | action                  | operation |
//! |-----|---------|-------------------------|-----------|
//! | 0   | 0       | none, "no changes"      | process   |
//! | >0  | 0       | insert new              | insert    |
//! | >0  | >0      | insert new, update rest | update    |
//! | 0   | >0      | update changed          | update    |
//!
//! An empty stored candidate set is not special: every incoming row lands in
//! the new partition and the table above applies unchanged. Incoming rows
//! sharing an identity are not deduplicated; if the backend rejects one, the
//! whole call rolls back.
//!
//! Each call runs in one transaction and returns a fresh [`Outcome`]. Calls
//! touching the same identities from different connections are not
//! coordinated beyond what the backend's locking provides.

use std::collections::HashMap;

use log::{debug, info, trace};

use crate::{
    coerce::coerce,
    data::TimezonePolicy,
    error::IngestError,
    gateway::{Storage, TableGateway, TransactionScope},
    outcome::{Operation, Outcome},
    rows::{IdentityKey, RawRowSet, Row, RowSet},
    schema::{SchemaRegistry, TableSchema},
};

/// Indices into the incoming row set, split by how they relate to storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub new: Vec<usize>,
    pub changed: Vec<usize>,
    pub unchanged: Vec<usize>,
}

impl Partition {
    pub fn has_writes(&self) -> bool {
        !self.new.is_empty() || !self.changed.is_empty()
    }
}

/// Splits `incoming` against `stored`. Both row sets must already be
/// coerced; only columns present in `incoming` are compared.
pub fn partition(
    table: &str,
    incoming: &RowSet,
    stored: &RowSet,
    identity: &[String],
) -> Result<Partition, IngestError> {
    let incoming_keys = incoming.positions(table, identity)?;
    let stored_keys = stored.positions(table, identity)?;

    let mut by_identity: HashMap<IdentityKey, &Row> = HashMap::with_capacity(stored.len());
    for row in &stored.rows {
        by_identity
            .entry(IdentityKey::from_row(row, &stored_keys))
            .or_insert(row);
    }

    let compared = incoming
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !identity.contains(name))
        .map(|(idx, name)| {
            stored.column_index(name).map(|s| (idx, s)).ok_or_else(|| {
                IngestError::schema_mismatch(
                    table,
                    format!("stored rows do not carry column '{name}'"),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut result = Partition::default();
    for (idx, row) in incoming.rows.iter().enumerate() {
        let key = IdentityKey::from_row(row, &incoming_keys);
        match by_identity.get(&key) {
            None => result.new.push(idx),
            Some(existing) => {
                let differs = compared
                    .iter()
                    .any(|&(incoming_idx, stored_idx)| row[incoming_idx] != existing[stored_idx]);
                if differs {
                    result.changed.push(idx);
                } else {
                    result.unchanged.push(idx);
                }
            }
        }
    }
    Ok(result)
}

/// A row set coerced for one table, with identity keys extracted.
struct Prepared<'r> {
    schema: &'r TableSchema,
    rows: RowSet,
    keys: Vec<IdentityKey>,
}

pub struct Engine<'r> {
    registry: &'r SchemaRegistry,
    timezone: TimezonePolicy,
}

impl<'r> Engine<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            timezone: TimezonePolicy::default(),
        }
    }

    pub fn with_timezone(mut self, timezone: TimezonePolicy) -> Self {
        self.timezone = timezone;
        self
    }

    /// Insert-if-absent, update-if-changed.
    pub fn reconcile<S: Storage>(
        &self,
        storage: &mut S,
        table_name: &str,
        incoming: &RawRowSet,
        identity: &[String],
    ) -> Outcome {
        self.try_reconcile(storage, table_name, incoming, identity)
            .unwrap_or_else(|err| {
                info!("Reconciliation of '{table_name}' failed: {err}");
                Outcome::failure(Operation::Update, &err)
            })
    }

    /// Inserts rows whose identity is not stored yet and never updates.
    /// Fails with [`IngestError::DuplicateIdentity`] when every row is
    /// already stored.
    pub fn insert<S: Storage>(
        &self,
        storage: &mut S,
        table_name: &str,
        incoming: &RawRowSet,
        identity: &[String],
    ) -> Outcome {
        self.try_insert(storage, table_name, incoming, identity)
            .unwrap_or_else(|err| {
                info!("Insert into '{table_name}' failed: {err}");
                Outcome::failure(Operation::Insert, &err)
            })
    }

    /// Unconditional delete by identity; no diffing.
    pub fn delete<S: Storage>(
        &self,
        storage: &mut S,
        table_name: &str,
        incoming: &RawRowSet,
        identity: &[String],
    ) -> Outcome {
        self.try_delete(storage, table_name, incoming, identity)
            .unwrap_or_else(|err| {
                info!("Delete from '{table_name}' failed: {err}");
                Outcome::failure(Operation::Delete, &err)
            })
    }

    /// Validates the target and identity, then coerces. `None` means there are
    /// no rows; a header-only file may carry no columns at all.
    fn prepare(
        &self,
        table_name: &str,
        incoming: &RawRowSet,
        identity: &[String],
    ) -> Result<Option<Prepared<'r>>, IngestError> {
        let schema = self
            .registry
            .table(table_name)
            .ok_or_else(|| IngestError::unknown_table(table_name))?;
        if identity.is_empty() {
            return Err(IngestError::schema_mismatch(
                table_name,
                "identity column set is empty",
            ));
        }
        if let Some(unknown) = identity.iter().find(|c| schema.column(c).is_none()) {
            return Err(IngestError::schema_mismatch(
                table_name,
                format!("identity column '{unknown}' is not declared"),
            ));
        }
        if incoming.is_empty() {
            debug!("No incoming rows for '{table_name}'");
            return Ok(None);
        }
        let rows = coerce(incoming, schema, self.timezone)?;
        let positions = rows.positions(table_name, identity)?;
        let keys = rows
            .rows
            .iter()
            .map(|row| IdentityKey::from_row(row, &positions))
            .collect();
        Ok(Some(Prepared { schema, rows, keys }))
    }

    fn stored_candidates<G: TableGateway>(
        &self,
        gateway: &G,
        prepared: &Prepared<'_>,
        identity: &[String],
    ) -> Result<RowSet, IngestError> {
        let raw = gateway.select_by_identity(prepared.schema, identity, &prepared.keys)?;
        coerce(&raw, prepared.schema, self.timezone)
    }

    fn try_reconcile<S: Storage>(
        &self,
        storage: &mut S,
        table_name: &str,
        incoming: &RawRowSet,
        identity: &[String],
    ) -> Result<Outcome, IngestError> {
        let Some(prepared) = self.prepare(table_name, incoming, identity)? else {
            return Ok(Outcome::no_changes());
        };
        let scope = storage.begin()?;
        let stored = self.stored_candidates(&scope, &prepared, identity)?;
        let split = partition(table_name, &prepared.rows, &stored, identity)?;
        debug!(
            "Partitioned {} incoming row(s) for '{}': {} new, {} changed, {} unchanged",
            prepared.rows.len(),
            table_name,
            split.new.len(),
            split.changed.len(),
            split.unchanged.len()
        );

        if !split.has_writes() {
            info!("No changes for '{table_name}'");
            return Ok(Outcome::no_changes());
        }

        let inserted = scope.insert_many(prepared.schema, &subset(&prepared.rows, &split.new))?;

        let set_positions = prepared
            .rows
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !identity.contains(name))
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        let set_columns = set_positions
            .iter()
            .map(|&idx| prepared.rows.columns[idx].clone())
            .collect::<Vec<_>>();
        let mut updated = 0usize;
        for &idx in &split.changed {
            let row = &prepared.rows.rows[idx];
            trace!("Updating {} in '{table_name}'", prepared.keys[idx].describe());
            let values = set_positions
                .iter()
                .map(|&pos| row[pos].clone())
                .collect::<Vec<_>>();
            updated += scope.update_by_identity(
                prepared.schema,
                identity,
                &prepared.keys[idx],
                &set_columns,
                &values,
            )?;
        }
        scope.commit()?;

        let operation = if updated > 0 {
            Operation::Update
        } else if inserted > 0 {
            Operation::Insert
        } else {
            Operation::Process
        };
        info!("Reconciled '{table_name}': inserted {inserted}, updated {updated}");
        Ok(Outcome::success(
            operation,
            inserted + updated,
            Some(format!(
                "inserted {inserted} and updated {updated} row(s) in '{table_name}'"
            )),
        ))
    }

    fn try_insert<S: Storage>(
        &self,
        storage: &mut S,
        table_name: &str,
        incoming: &RawRowSet,
        identity: &[String],
    ) -> Result<Outcome, IngestError> {
        let Some(prepared) = self.prepare(table_name, incoming, identity)? else {
            return Ok(Outcome::no_changes());
        };
        let scope = storage.begin()?;
        let stored = self.stored_candidates(&scope, &prepared, identity)?;
        let split = partition(table_name, &prepared.rows, &stored, identity)?;
        if split.new.is_empty() {
            return Err(IngestError::DuplicateIdentity {
                table: table_name.to_string(),
            });
        }
        let inserted = scope.insert_many(prepared.schema, &subset(&prepared.rows, &split.new))?;
        scope.commit()?;
        info!(
            "Inserted {inserted} row(s) into '{table_name}', skipped {} already stored",
            split.changed.len() + split.unchanged.len()
        );
        Ok(Outcome::success(
            Operation::Insert,
            inserted,
            Some(format!("inserted {inserted} row(s) into '{table_name}'")),
        ))
    }

    fn try_delete<S: Storage>(
        &self,
        storage: &mut S,
        table_name: &str,
        incoming: &RawRowSet,
        identity: &[String],
    ) -> Result<Outcome, IngestError> {
        let Some(prepared) = self.prepare(table_name, incoming, identity)? else {
            return Ok(Outcome::no_changes());
        };
        let scope = storage.begin()?;
        let mut deleted = 0usize;
        for key in &prepared.keys {
            deleted += scope.delete_by_identity(prepared.schema, identity, key)?;
        }
        scope.commit()?;
        info!("Deleted {deleted} row(s) from '{table_name}'");
        Ok(Outcome::success(
            Operation::Delete,
            deleted,
            Some(format!("deleted {deleted} row(s) from '{table_name}'")),
        ))
    }
}

fn subset(rows: &RowSet, indices: &[usize]) -> RowSet {
    RowSet {
        columns: rows.columns.clone(),
        rows: indices.iter().map(|&idx| rows.rows[idx].clone()).collect(),
    }
}
