//! Aligns loosely typed rows with a table's declared column types.
//!
//! Coercion never fails on a bad value: anything that cannot become the
//! declared type becomes `None`, the single null representation used by the
//! engine and the store. It fails only when the row set itself does not fit
//! the table (unknown column, duplicated column, ragged row).

use std::collections::HashSet;

use log::debug;

use crate::{
    data::{Cell, RawValue, TimezonePolicy, Value, integral_float, parse_integer, parse_timestamp, render_real},
    error::IngestError,
    rows::{RawRowSet, RowSet},
    schema::{ColumnType, TableSchema},
};

pub fn coerce(
    rows: &RawRowSet,
    schema: &TableSchema,
    policy: TimezonePolicy,
) -> Result<RowSet, IngestError> {
    let mut seen = HashSet::with_capacity(rows.columns.len());
    let mut types = Vec::with_capacity(rows.columns.len());
    for name in &rows.columns {
        let column = schema.column(name).ok_or_else(|| {
            IngestError::schema_mismatch(&schema.name, format!("unknown column '{name}'"))
        })?;
        if !seen.insert(name.as_str()) {
            return Err(IngestError::schema_mismatch(
                &schema.name,
                format!("column '{name}' appears more than once"),
            ));
        }
        types.push(column.datatype);
    }

    let mut coerced = Vec::with_capacity(rows.rows.len());
    let mut nulled = 0usize;
    for (row_idx, row) in rows.rows.iter().enumerate() {
        if row.len() != types.len() {
            return Err(IngestError::schema_mismatch(
                &schema.name,
                format!(
                    "row {} has {} field(s) but {} column(s) were declared",
                    row_idx + 1,
                    row.len(),
                    types.len()
                ),
            ));
        }
        let cells = row
            .iter()
            .zip(&types)
            .map(|(raw, ty)| {
                let cell = coerce_value(raw, *ty, policy);
                if cell.is_none() && !raw.is_null() {
                    nulled += 1;
                }
                cell
            })
            .collect::<Vec<_>>();
        coerced.push(cells);
    }
    if nulled > 0 {
        debug!(
            "Coercion of '{}' replaced {} untypeable value(s) with null",
            schema.name, nulled
        );
    }

    Ok(RowSet {
        columns: rows.columns.clone(),
        rows: coerced,
    })
}

pub fn coerce_value(raw: &RawValue, ty: ColumnType, policy: TimezonePolicy) -> Cell {
    match (ty, raw) {
        (_, RawValue::Null) => None,
        (ColumnType::Integer, RawValue::Integer(i)) => Some(Value::Integer(*i)),
        (ColumnType::Integer, RawValue::Real(f)) => integral_float(*f).map(Value::Integer),
        (ColumnType::Integer, RawValue::Text(s)) => parse_integer(s).map(Value::Integer),
        (ColumnType::Text, RawValue::Integer(i)) => Some(Value::Text(i.to_string())),
        (ColumnType::Text, RawValue::Real(f)) => Some(Value::Text(render_real(*f))),
        (ColumnType::Text, RawValue::Text(s)) => Some(Value::Text(s.clone())),
        (ColumnType::Timestamp, RawValue::Text(s)) => {
            parse_timestamp(s, policy).map(Value::Timestamp)
        }
        (ColumnType::Timestamp, RawValue::Integer(_) | RawValue::Real(_)) => None,
    }
}
