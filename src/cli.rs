use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::data::TimezonePolicy;

#[derive(Debug, Parser)]
#[command(author, version, about = "Ingest CSV files into catalogued tables", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// SQLite database file (defaults to csv-ingest.db)
    #[arg(long, global = true, env = "CSV_INGEST_DATABASE")]
    pub database: Option<PathBuf>,
    /// Schema definition (YAML); the built-in hiring schema is used if omitted
    #[arg(long, global = true, env = "CSV_INGEST_SCHEMA")]
    pub schema: Option<PathBuf>,
    /// Settings file (YAML)
    #[arg(long, global = true, env = "CSV_INGEST_CONFIG")]
    pub config: Option<PathBuf>,
    /// How UTC offsets on incoming timestamps are handled
    #[arg(long, global = true, value_enum)]
    pub timezone: Option<TimezonePolicy>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create every registered table that does not exist yet
    Init,
    /// List registered tables with their storage row counts
    Tables,
    /// Compare stored tables against the schema definition
    Verify,
    /// Resolve and coerce a CSV file without touching storage
    Process(ProcessArgs),
    /// Reconcile a CSV file into its table (insert new rows, update changed ones)
    Ingest(IngestArgs),
    /// Delete the rows identified by a CSV file from its table
    Delete(DeleteArgs),
    /// Inspect or edit the file-to-table catalog
    Catalog(CatalogArgs),
    /// Run one of the hiring reports
    Report(ReportArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Input CSV file ('-' for stdin); its name without extension selects the table
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Identifier used to select the table instead of the file name (required for stdin)
    #[arg(long = "file-id")]
    pub file_id: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Treat the first row as column names instead of using schema order
    #[arg(long = "has-headers")]
    pub has_headers: bool,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Number of coerced rows to preview (0 disables the preview)
    #[arg(long, default_value_t = 10)]
    pub preview: usize,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Identity columns used to match stored rows (defaults to the primary key)
    #[arg(short = 'k', long = "identity", value_delimiter = ',')]
    pub identity: Vec<String>,
    /// Only insert rows whose identity is absent; never update
    #[arg(long = "insert-only")]
    pub insert_only: bool,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Identity columns used to match stored rows (defaults to the primary key)
    #[arg(short = 'k', long = "identity", value_delimiter = ',')]
    pub identity: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub action: CatalogAction,
}

#[derive(Debug, Subcommand)]
pub enum CatalogAction {
    /// Show every file-to-table mapping
    List,
    /// Map a file identifier to a registered table
    Set {
        /// File identifier (the file name without extension)
        file_name: String,
        /// Registered table that receives the file
        table_name: String,
    },
    /// Remove the mapping for a file identifier
    Remove {
        /// File identifier to unmap
        file_name: String,
    },
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Report to run
    #[arg(value_enum)]
    pub kind: ReportKind,
    /// Calendar year the report covers
    #[arg(long)]
    pub year: i32,
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    /// Hires per department and job, split by quarter
    Quarterly,
    /// Departments hiring more than the yearly mean
    AboveMean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delimiter_accepts_names_and_characters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("pipe"), Ok(b'|'));
        assert_eq!(parse_delimiter(":"), Ok(b':'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn identity_flag_splits_on_commas() {
        let cli = Cli::try_parse_from([
            "csv-ingest",
            "ingest",
            "-i",
            "hired_employees.csv",
            "--identity",
            "id,name",
        ])
        .unwrap();
        let Commands::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.identity, vec!["id".to_string(), "name".to_string()]);
        assert!(!args.insert_only);
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "csv-ingest",
            "report",
            "above-mean",
            "--year",
            "2021",
            "--database",
            "hiring.db",
            "--timezone",
            "utc",
        ])
        .unwrap();
        assert_eq!(cli.global.database, Some(PathBuf::from("hiring.db")));
        assert_eq!(cli.global.timezone, Some(TimezonePolicy::Utc));
    }
}
