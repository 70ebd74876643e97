//! File processing: identify the target table and coerce the file's rows.
//!
//! Processing never touches storage. Its report says where the file would go
//! and how many rows it carries; the coerced rows ride along for the caller
//! to reconcile, insert, or delete.

use std::{io::Read, path::Path};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use log::info;
use serde::Serialize;

use crate::{
    catalog::{Catalog, file_identifier},
    coerce::coerce,
    data::{RawValue, TimezonePolicy},
    error::IngestError,
    io_utils,
    outcome::{Operation, Status},
    rows::{RawRowSet, RowSet},
    schema::SchemaRegistry,
};

/// Status reported when a file cannot be read or parsed as CSV at all.
const MALFORMED_FILE_STATUS: u16 = 400;

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
    /// Header-less files take their column names from the table schema.
    pub has_headers: bool,
    pub timezone: TimezonePolicy,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
            has_headers: false,
            timezone: TimezonePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub table_name: String,
    pub raw: RawRowSet,
    pub rows: RowSet,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub status: Status,
    pub status_code: u16,
    pub operation: Operation,
    pub affected_row_count: usize,
    pub message: Option<String>,
    pub resolved_table_name: Option<String>,
    #[serde(skip)]
    pub data: Option<ProcessedFile>,
}

impl ProcessReport {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    fn failure(file_id: Option<String>, status_code: u16, message: String) -> Self {
        Self {
            status: Status::Failure,
            status_code,
            operation: Operation::Process,
            affected_row_count: 0,
            message: Some(message),
            resolved_table_name: file_id,
            data: None,
        }
    }
}

/// Processes a file on disk; the file stem is its identifier.
pub fn process(
    path: &Path,
    options: &ReadOptions,
    registry: &SchemaRegistry,
    catalog: &Catalog,
) -> ProcessReport {
    process_as(path, None, options, registry, catalog)
}

/// Like [`process`], but `file_id` replaces the file stem when given. Reading
/// stdin (`-`) has no stem, so it needs one.
pub fn process_as(
    path: &Path,
    file_id: Option<&str>,
    options: &ReadOptions,
    registry: &SchemaRegistry,
    catalog: &Catalog,
) -> ProcessReport {
    let file_id = match file_id {
        Some(id) => id.to_string(),
        None if io_utils::is_dash(path) => {
            return ProcessReport::failure(
                None,
                MALFORMED_FILE_STATUS,
                "Reading stdin requires a file identifier (--file-id)".to_string(),
            );
        }
        None => match file_identifier(path) {
            Some(stem) => stem,
            None => {
                return ProcessReport::failure(
                    None,
                    MALFORMED_FILE_STATUS,
                    format!("Cannot derive a table identifier from {path:?}"),
                );
            }
        },
    };
    let options = ReadOptions {
        delimiter: Some(io_utils::resolve_input_delimiter(path, options.delimiter)),
        ..*options
    };
    match io_utils::open_input(path) {
        Ok(reader) => process_reader(&file_id, reader, &options, registry, catalog),
        Err(err) => ProcessReport::failure(
            Some(file_id),
            MALFORMED_FILE_STATUS,
            format!("Error processing file {path:?}: {err:#}"),
        ),
    }
}

/// Processes CSV contents identified by `file_id`.
pub fn process_reader<R: Read>(
    file_id: &str,
    reader: R,
    options: &ReadOptions,
    registry: &SchemaRegistry,
    catalog: &Catalog,
) -> ProcessReport {
    match load(file_id, reader, options, registry, catalog) {
        Ok(processed) => {
            let count = processed.rows.len();
            info!(
                "Processed '{file_id}' as table '{}' ({count} row(s))",
                processed.table_name
            );
            ProcessReport {
                status: Status::Success,
                status_code: 200,
                operation: Operation::Process,
                affected_row_count: count,
                message: None,
                resolved_table_name: Some(processed.table_name.clone()),
                data: Some(processed),
            }
        }
        Err(err) => {
            let status_code = err
                .downcast_ref::<IngestError>()
                .map(|e| e.kind().status_code())
                .unwrap_or(MALFORMED_FILE_STATUS);
            ProcessReport::failure(
                Some(file_id.to_string()),
                status_code,
                format!("Error processing file '{file_id}': {err:#}"),
            )
        }
    }
}

fn load<R: Read>(
    file_id: &str,
    reader: R,
    options: &ReadOptions,
    registry: &SchemaRegistry,
    catalog: &Catalog,
) -> Result<ProcessedFile> {
    let table_name = catalog.resolve(file_id, registry)?;
    let schema = registry
        .table(&table_name)
        .ok_or_else(|| anyhow!("Table '{table_name}' vanished from the registry"))?;

    let delimiter = options.delimiter.unwrap_or(io_utils::DEFAULT_CSV_DELIMITER);
    let mut csv_reader = io_utils::open_csv_reader(reader, delimiter, options.has_headers);
    let columns = if options.has_headers {
        io_utils::reader_headers(&mut csv_reader, options.encoding)?
    } else {
        schema.headers()
    };

    let mut raw = RawRowSet::new(columns);
    for (row_idx, record) in csv_reader.byte_records().enumerate() {
        let line = row_idx + 1 + usize::from(options.has_headers);
        let record = record.with_context(|| format!("Reading line {line}"))?;
        let fields = io_utils::decode_record(&record, options.encoding)
            .with_context(|| format!("Decoding line {line}"))?;
        raw.push(fields.iter().map(|f| RawValue::from_field(f)).collect());
    }

    let rows = coerce(&raw, schema, options.timezone)?;
    Ok(ProcessedFile {
        table_name,
        raw,
        rows,
    })
}
