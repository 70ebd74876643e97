//! Table schemas and the registry loaded at startup.
//!
//! The registry is an explicit, versioned YAML document (see
//! `schema/hiring.yml`, compiled in as the default). It is consulted by the
//! coercion layer, the engine, and the SQLite store; nothing here inspects
//! the live database. Drift between the two is reported separately by
//! [`crate::store::SqliteStore::schema_drift`].
//!
//! ## Responsibilities
//!
//! - YAML loading via `serde_yaml` with version checks
//! - Column type tokens and their aliases
//! - Identifier validation (names are interpolated into SQL)
//! - `CREATE TABLE` statements for `init`

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path, str::FromStr, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail, ensure};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

pub const CURRENT_SCHEMA_VERSION: &str = "1";

const BUILTIN_SCHEMA: &str = include_str!("../schema/hiring.yml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Text,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["integer", "text", "timestamp"]
    }

    /// Declared SQLite column type. Timestamps are stored as ISO text.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" | "bigint" => Ok(ColumnType::Integer),
            "text" | "string" | "varchar" => Ok(ColumnType::Text),
            "timestamp" | "datetime" | "date-time" => Ok(ColumnType::Timestamp),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub datatype: ColumnType,
    #[serde(default = "ColumnMeta::default_nullable")]
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, datatype: ColumnType) -> Self {
        Self {
            name: name.into(),
            datatype,
            nullable: true,
        }
    }

    pub const fn default_nullable() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    pub columns: Vec<ColumnMeta>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            columns,
        }
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            is_valid_identifier(&self.name),
            "Table name '{}' is not a valid identifier",
            self.name
        );
        ensure!(
            !self.columns.is_empty(),
            "Table '{}' must declare at least one column",
            self.name
        );
        let mut seen = HashSet::new();
        for column in &self.columns {
            ensure!(
                is_valid_identifier(&column.name),
                "Column name '{}' in table '{}' is not a valid identifier",
                column.name,
                self.name
            );
            ensure!(
                seen.insert(column.name.as_str()),
                "Column '{}' is declared twice in table '{}'",
                column.name,
                self.name
            );
        }
        for key in &self.primary_key {
            ensure!(
                seen.contains(key.as_str()),
                "Primary key column '{}' is not declared in table '{}'",
                key,
                self.name
            );
        }
        Ok(())
    }

    pub fn create_statement(&self) -> String {
        let mut parts = self
            .columns
            .iter()
            .map(|column| {
                let mut def = format!("\"{}\" {}", column.name, column.datatype.sql_type());
                if !column.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect::<Vec<_>>();
        if !self.primary_key.is_empty() {
            let keys = self
                .primary_key
                .iter()
                .map(|k| format!("\"{k}\""))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("PRIMARY KEY ({keys})"));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.name,
            parts.join(",\n    ")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    pub tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSchema>) -> Result<Self> {
        let registry = Self {
            schema_version: Some(CURRENT_SCHEMA_VERSION.to_string()),
            tables,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// The hiring schema bundled with the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_SCHEMA).context("Parsing built-in schema")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let registry: SchemaRegistry =
            serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        registry
            .validate()
            .with_context(|| format!("Validating schema file {path:?}"))?;
        Ok(registry)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let registry: SchemaRegistry = serde_yaml::from_str(input).context("Parsing schema YAML")?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn version(&self) -> &str {
        self.schema_version
            .as_deref()
            .unwrap_or(CURRENT_SCHEMA_VERSION)
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.version() != CURRENT_SCHEMA_VERSION {
            bail!(
                "Unsupported schema_version '{}' (expected '{}')",
                self.version(),
                CURRENT_SCHEMA_VERSION
            );
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            ensure!(
                seen.insert(table.name.as_str()),
                "Table '{}' is declared twice",
                table.name
            );
        }
        Ok(())
    }
}

pub fn is_valid_identifier(name: &str) -> bool {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"))
        .is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schema_declares_hiring_tables() {
        let registry = SchemaRegistry::builtin().expect("builtin schema");
        assert_eq!(
            registry
                .tables
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>(),
            vec!["catalog_tables", "departments", "jobs", "hired_employees"]
        );
        let hires = registry.table("hired_employees").unwrap();
        assert_eq!(
            hires.column("datetime").map(|c| c.datatype),
            Some(ColumnType::Timestamp)
        );
        assert_eq!(hires.primary_key, vec!["id".to_string()]);
    }

    #[test]
    fn column_type_accepts_aliases() {
        assert_eq!(ColumnType::from_str("INT").unwrap(), ColumnType::Integer);
        assert_eq!(ColumnType::from_str("string").unwrap(), ColumnType::Text);
        assert_eq!(
            ColumnType::from_str(" datetime ").unwrap(),
            ColumnType::Timestamp
        );
        let err = ColumnType::from_str("float").expect_err("float is not supported");
        assert!(err.to_string().contains("Supported types"));
    }

    #[test]
    fn schema_parsing_rejects_unknown_primary_key() {
        let yaml = r#"
tables:
  - name: jobs
    primary_key: [code]
    columns:
      - name: id
        datatype: integer
"#;
        let err = SchemaRegistry::from_yaml_str(yaml).expect_err("unknown key column");
        assert!(err.to_string().contains("Primary key column 'code'"));
    }

    #[test]
    fn schema_parsing_rejects_unsafe_identifiers() {
        let yaml = r#"
tables:
  - name: "jobs; drop table jobs"
    columns:
      - name: id
        datatype: integer
"#;
        let err = SchemaRegistry::from_yaml_str(yaml).expect_err("unsafe table name");
        assert!(err.to_string().contains("not a valid identifier"));
    }

    #[test]
    fn schema_parsing_rejects_future_versions() {
        let yaml = r#"
schema_version: "7"
tables: []
"#;
        let err = SchemaRegistry::from_yaml_str(yaml).expect_err("unsupported version");
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn create_statement_includes_constraints() {
        let table = TableSchema::new(
            "departments",
            vec![
                ColumnMeta {
                    name: "id".into(),
                    datatype: ColumnType::Integer,
                    nullable: false,
                },
                ColumnMeta::new("department", ColumnType::Text),
            ],
        )
        .with_primary_key(&["id"]);
        let sql = table.create_statement();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"departments\""));
        assert!(sql.contains("\"id\" INTEGER NOT NULL"));
        assert!(sql.contains("\"department\" TEXT"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }
}
