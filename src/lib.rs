pub mod catalog;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod io_utils;
pub mod outcome;
pub mod reports;
pub mod rows;
pub mod schema;
pub mod store;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;

use crate::{
    catalog::CATALOG_TABLE,
    cli::{CatalogAction, Cli, Commands, OutputFormat, ReportKind},
    config::Settings,
    engine::Engine,
    ingest::{ProcessReport, ProcessedFile},
    outcome::Outcome,
    schema::{SchemaRegistry, TableSchema},
    store::SqliteStore,
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli.global)?;
    let registry = settings.load_registry()?;
    debug!(
        "Schema version {} with {} table(s)",
        registry.version(),
        registry.tables.len()
    );
    match cli.command {
        Commands::Init => handle_init(&settings, &registry),
        Commands::Tables => handle_tables(&settings, &registry),
        Commands::Verify => handle_verify(&settings, &registry),
        Commands::Process(args) => handle_process(&settings, &registry, &args),
        Commands::Ingest(args) => handle_ingest(&settings, &registry, &args),
        Commands::Delete(args) => handle_delete(&settings, &registry, &args),
        Commands::Catalog(args) => handle_catalog(&settings, &registry, args.action),
        Commands::Report(args) => handle_report(&settings, &args),
    }
}

fn handle_init(settings: &Settings, registry: &SchemaRegistry) -> Result<()> {
    let store = settings.open_store()?;
    let count = store.create_tables(registry)?;
    info!(
        "Initialised {} table(s) in {:?}",
        count, settings.database
    );
    Ok(())
}

fn handle_tables(settings: &Settings, registry: &SchemaRegistry) -> Result<()> {
    let store = settings.open_store()?;
    let mut table = TextTable::new(
        ["table", "columns", "primary_key", "rows"]
            .iter()
            .map(|h| h.to_string())
            .collect(),
    );
    for schema in &registry.tables {
        let rows = if store.table_exists(&schema.name)? {
            store.count_rows(&schema.name)?.to_string()
        } else {
            "-".to_string()
        };
        table.push_row(vec![
            schema.name.clone(),
            schema.columns.len().to_string(),
            schema.primary_key.join(","),
            rows,
        ]);
    }
    table.print();
    Ok(())
}

fn handle_verify(settings: &Settings, registry: &SchemaRegistry) -> Result<()> {
    let store = settings.open_store()?;
    let drift = store.schema_drift(registry)?;
    if drift.is_empty() {
        info!(
            "Database {:?} matches schema version {}",
            settings.database,
            registry.version()
        );
        return Ok(());
    }
    for issue in &drift {
        warn!("{issue}");
        println!("{issue}");
    }
    bail!(
        "{} schema difference(s) found in {:?}",
        drift.len(),
        settings.database
    )
}

fn process_input(
    settings: &Settings,
    registry: &SchemaRegistry,
    store: &SqliteStore,
    input: &cli::InputArgs,
) -> Result<ProcessReport> {
    let options = settings.read_options(input)?;
    let catalog = store.load_catalog()?;
    debug!("Catalog holds {} mapping(s)", catalog.len());
    info!("Processing {:?}", input.input);
    Ok(ingest::process_as(
        &input.input,
        input.file_id.as_deref(),
        &options,
        registry,
        &catalog,
    ))
}

fn handle_process(
    settings: &Settings,
    registry: &SchemaRegistry,
    args: &cli::ProcessArgs,
) -> Result<()> {
    let store = settings.open_store()?;
    let report = process_input(settings, registry, &store, &args.input)?;
    print_json(&report)?;
    let processed = require_processed(report)?;
    if args.preview > 0 && !processed.rows.is_empty() {
        let mut table = TextTable::new(processed.rows.columns.clone());
        for row in processed.rows.rows.iter().take(args.preview) {
            table.push_row(
                row.iter()
                    .map(|cell| cell.as_ref().map(|v| v.as_display()).unwrap_or_default())
                    .collect(),
            );
        }
        table.print();
    }
    Ok(())
}

fn handle_ingest(
    settings: &Settings,
    registry: &SchemaRegistry,
    args: &cli::IngestArgs,
) -> Result<()> {
    let mut store = settings.open_store()?;
    let report = process_input(settings, registry, &store, &args.input)?;
    if !report.is_success() {
        print_json(&report)?;
    }
    let processed = require_processed(report)?;
    let schema = table_schema(registry, &processed.table_name)?;
    let identity = identity_columns(&args.identity, schema)?;
    let engine = Engine::new(registry).with_timezone(settings.timezone);
    let outcome = if args.insert_only {
        engine.insert(&mut store, &processed.table_name, &processed.raw, &identity)
    } else {
        engine.reconcile(&mut store, &processed.table_name, &processed.raw, &identity)
    };
    finish(outcome)
}

fn handle_delete(
    settings: &Settings,
    registry: &SchemaRegistry,
    args: &cli::DeleteArgs,
) -> Result<()> {
    let mut store = settings.open_store()?;
    let report = process_input(settings, registry, &store, &args.input)?;
    if !report.is_success() {
        print_json(&report)?;
    }
    let processed = require_processed(report)?;
    let schema = table_schema(registry, &processed.table_name)?;
    let identity = identity_columns(&args.identity, schema)?;
    let engine = Engine::new(registry).with_timezone(settings.timezone);
    finish(engine.delete(&mut store, &processed.table_name, &processed.raw, &identity))
}

fn handle_catalog(
    settings: &Settings,
    registry: &SchemaRegistry,
    action: CatalogAction,
) -> Result<()> {
    let mut store = settings.open_store()?;
    match action {
        CatalogAction::List => {
            let catalog = store.load_catalog()?;
            let mut table = TextTable::new(vec!["file_name".into(), "table_name".into()]);
            for (file_name, table_name) in catalog.entries() {
                table.push_row(vec![file_name.to_string(), table_name.to_string()]);
            }
            table.print();
            Ok(())
        }
        CatalogAction::Set {
            file_name,
            table_name,
        } => {
            require_catalog_table(&store, settings)?;
            if !registry.contains(&table_name) {
                return Err(error::IngestError::unknown_table(&table_name).into());
            }
            store.set_catalog_entry(&file_name, &table_name)?;
            info!("Catalog maps '{file_name}' to table '{table_name}'");
            Ok(())
        }
        CatalogAction::Remove { file_name } => {
            require_catalog_table(&store, settings)?;
            if store.remove_catalog_entry(&file_name)? == 0 {
                bail!("Catalog has no entry for '{file_name}'");
            }
            info!("Removed catalog entry for '{file_name}'");
            Ok(())
        }
    }
}

fn handle_report(settings: &Settings, args: &cli::ReportArgs) -> Result<()> {
    let store = settings.open_store()?;
    let conn = store.connection();
    info!("Running {:?} report for {}", args.kind, args.year);
    let (headers, rows, json) = match args.kind {
        ReportKind::Quarterly => {
            let rows = reports::hires_by_quarter(conn, args.year)
                .context("Running quarterly hiring report")?;
            (
                reports::QuarterlyHires::headers(),
                rows.iter().map(|r| r.cells()).collect::<Vec<_>>(),
                serde_json::to_string_pretty(&rows)?,
            )
        }
        ReportKind::AboveMean => {
            let rows = reports::departments_above_mean(conn, args.year)
                .context("Running above-mean hiring report")?;
            (
                reports::DepartmentHires::headers(),
                rows.iter().map(|r| r.cells()).collect::<Vec<_>>(),
                serde_json::to_string_pretty(&rows)?,
            )
        }
    };
    match args.format {
        OutputFormat::Json => println!("{json}"),
        OutputFormat::Table => {
            let mut table = TextTable::new(headers);
            for row in rows {
                table.push_row(row);
            }
            table.print();
        }
    }
    Ok(())
}

fn require_processed(report: ProcessReport) -> Result<ProcessedFile> {
    if !report.is_success() {
        bail!(
            "{}",
            report
                .message
                .unwrap_or_else(|| "File processing failed".to_string())
        );
    }
    report
        .data
        .ok_or_else(|| anyhow!("Processed file carried no rows"))
}

fn require_catalog_table(store: &SqliteStore, settings: &Settings) -> Result<()> {
    if !store.table_exists(CATALOG_TABLE)? {
        bail!(
            "Database {:?} has no '{CATALOG_TABLE}' table; run `csv-ingest init` first",
            settings.database
        );
    }
    Ok(())
}

fn table_schema<'a>(registry: &'a SchemaRegistry, name: &str) -> Result<&'a TableSchema> {
    registry
        .table(name)
        .ok_or_else(|| error::IngestError::unknown_table(name).into())
}

/// Explicit identity columns, or the table's primary key.
fn identity_columns(requested: &[String], schema: &TableSchema) -> Result<Vec<String>> {
    let identity = requested
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    if !identity.is_empty() {
        return Ok(identity);
    }
    if schema.primary_key.is_empty() {
        bail!(
            "Table '{}' has no primary key; pass --identity",
            schema.name
        );
    }
    Ok(schema.primary_key.clone())
}

fn finish(outcome: Outcome) -> Result<()> {
    print_json(&outcome)?;
    if outcome.is_success() {
        Ok(())
    } else {
        bail!(
            "{} failed: {}",
            outcome.operation,
            outcome.message.unwrap_or_default()
        )
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
