//! Runtime settings.
//!
//! Precedence, highest first: command-line flags (and their `CSV_INGEST_*`
//! environment variables), the YAML settings file given by `--config`, then
//! built-in defaults. Relative paths inside the settings file are resolved
//! against the file's directory.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    cli::{GlobalArgs, InputArgs, parse_delimiter},
    data::TimezonePolicy,
    ingest::ReadOptions,
    io_utils,
    schema::SchemaRegistry,
    store::SqliteStore,
};

pub const DEFAULT_DATABASE: &str = "csv-ingest.db";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub database: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub timezone: Option<TimezonePolicy>,
    pub delimiter: Option<String>,
    pub input_encoding: Option<String>,
    pub has_headers: Option<bool>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening settings file {path:?}"))?;
        let mut settings: SettingsFile = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing settings file {path:?}"))?;
        if let Some(base) = path.parent() {
            settings.database = settings.database.map(|p| relative_to(base, p));
            settings.schema = settings.schema.map(|p| relative_to(base, p));
        }
        Ok(settings)
    }
}

fn relative_to(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database: PathBuf,
    pub schema: Option<PathBuf>,
    pub timezone: TimezonePolicy,
    pub delimiter: Option<u8>,
    pub input_encoding: Option<String>,
    pub has_headers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            schema: None,
            timezone: TimezonePolicy::default(),
            delimiter: None,
            input_encoding: None,
            has_headers: false,
        }
    }
}

impl Settings {
    pub fn resolve(global: &GlobalArgs) -> Result<Self> {
        let file = match &global.config {
            Some(path) => SettingsFile::load(path)?,
            None => SettingsFile::default(),
        };
        let settings = Self::merge(global, file)?;
        debug!("Resolved settings: {settings:?}");
        Ok(settings)
    }

    pub fn merge(global: &GlobalArgs, file: SettingsFile) -> Result<Self> {
        let defaults = Settings::default();
        let delimiter = file
            .delimiter
            .as_deref()
            .map(parse_delimiter)
            .transpose()
            .map_err(|err| anyhow!("Invalid delimiter in settings file: {err}"))?;
        Ok(Settings {
            database: global
                .database
                .clone()
                .or(file.database)
                .unwrap_or(defaults.database),
            schema: global.schema.clone().or(file.schema),
            timezone: global
                .timezone
                .or(file.timezone)
                .unwrap_or(defaults.timezone),
            delimiter,
            input_encoding: file.input_encoding,
            has_headers: file.has_headers.unwrap_or(defaults.has_headers),
        })
    }

    pub fn load_registry(&self) -> Result<SchemaRegistry> {
        match &self.schema {
            Some(path) => SchemaRegistry::load(path),
            None => SchemaRegistry::builtin(),
        }
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.database)
            .with_context(|| format!("Opening database {:?}", self.database))
    }

    /// Per-command input flags win over the settings file.
    pub fn read_options(&self, input: &InputArgs) -> Result<ReadOptions> {
        let label = input
            .input_encoding
            .as_deref()
            .or(self.input_encoding.as_deref());
        Ok(ReadOptions {
            delimiter: input.delimiter.or(self.delimiter),
            encoding: io_utils::resolve_encoding(label)?,
            has_headers: input.has_headers || self.has_headers,
            timezone: self.timezone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn globals() -> GlobalArgs {
        GlobalArgs {
            database: None,
            schema: None,
            config: None,
            timezone: None,
        }
    }

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let settings = Settings::merge(&globals(), SettingsFile::default()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn flags_override_settings_file() {
        let mut global = globals();
        global.database = Some(PathBuf::from("cli.db"));
        global.timezone = Some(TimezonePolicy::Utc);
        let file = SettingsFile {
            database: Some(PathBuf::from("file.db")),
            timezone: Some(TimezonePolicy::Strip),
            delimiter: Some("tab".into()),
            has_headers: Some(true),
            ..SettingsFile::default()
        };
        let settings = Settings::merge(&global, file).unwrap();
        assert_eq!(settings.database, PathBuf::from("cli.db"));
        assert_eq!(settings.timezone, TimezonePolicy::Utc);
        assert_eq!(settings.delimiter, Some(b'\t'));
        assert!(settings.has_headers);
    }

    #[test]
    fn settings_file_paths_resolve_against_its_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ingest.yml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "database: data/hiring.db\ntimezone: utc").unwrap();
        let loaded = SettingsFile::load(&path).unwrap();
        assert_eq!(loaded.database, Some(dir.path().join("data/hiring.db")));
        assert_eq!(loaded.timezone, Some(TimezonePolicy::Utc));
    }

    #[test]
    fn settings_file_rejects_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ingest.yml");
        std::fs::write(&path, "databse: typo.db\n").unwrap();
        let err = SettingsFile::load(&path).expect_err("unknown key");
        assert!(format!("{err:#}").contains("databse"));
    }
}
