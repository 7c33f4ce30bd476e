pub mod backup;
pub mod compat;
pub mod executor;
pub mod release_schema;
pub mod steps;
pub mod validator;

pub use backup::{snapshot, BackupRecord};
pub use compat::Compatibility;
pub use executor::{migrate, MigrationPlan, MigrationReport, MigrationState, Migrator, StepSummary};
pub use steps::{builtin_graph, MigrationStep, StepError, StepFn};
pub use validator::{validate_store, ColumnSummary, ValidationIssue, ValidationSummary};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use trumig_core::{ContractError, Version};

pub const META_TABLE: &str = "meta";
pub const VERSION_KEY: &str = "trulens_version";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("store has no `trulens_version` entry in its `meta` table")]
    MissingVersionStamp,
    #[error("store version {raw:?} is malformed: {source}")]
    MalformedVersion {
        raw: String,
        #[source]
        source: ContractError,
    },
    #[error(
        "store version {version} predates every supported release and cannot be migrated; \
         discard the store and recreate it"
    )]
    UnsupportedVersion { version: String },
    #[error(
        "store version {version} (compatible with {checkpoint}) has no migration path to {latest}; \
         discard the store and recreate it"
    )]
    NoMigrationPath {
        version: String,
        checkpoint: Version,
        latest: Version,
    },
    #[error("store has no on-disk location to back up")]
    BackupUnavailable,
    #[error("failed to back up {} to {}: {source}", .original.display(), .target.display())]
    Backup {
        original: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "migration step {step} ({from} -> {to}) failed: {source}; the store was left at {from}, \
         original store saved at {}",
        .backup.display()
    )]
    StepFailure {
        step: &'static str,
        from: Version,
        to: Version,
        backup: PathBuf,
        #[source]
        source: StepError,
    },
    #[error("post-migration validation failed on {issue}; {backup}")]
    ValidationFailure {
        issue: ValidationIssue,
        backup: BackupHint,
    },
    #[error("{message}")]
    IncompatibleStore { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHint(pub Option<PathBuf>);

impl fmt::Display for BackupHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) => write!(
                f,
                "the migration completed but stability is not guaranteed; the original store is \
                 saved at {} and can be used with the previous release",
                path.display()
            ),
            None => f.write_str("no backup was taken for this run"),
        }
    }
}

pub struct LegacyStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl LegacyStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, MigrationError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    pub fn from_connection(conn: Connection, path: Option<PathBuf>) -> Self {
        Self { conn, path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn transaction(&self) -> Result<Transaction<'_>, rusqlite::Error> {
        self.conn.unchecked_transaction()
    }

    pub fn stored_version(&self) -> Result<Option<String>, MigrationError> {
        let value = self
            .conn
            .query_row(
                &format!("SELECT value FROM {META_TABLE} WHERE key = ?1"),
                [VERSION_KEY],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn current_version(&self) -> Result<(String, Version), MigrationError> {
        let raw = self
            .stored_version()?
            .ok_or(MigrationError::MissingVersionStamp)?;
        let version = raw
            .parse::<Version>()
            .map_err(|source| MigrationError::MalformedVersion {
                raw: raw.clone(),
                source,
            })?;
        Ok((raw, version))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, MigrationError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn table_names(&self) -> Result<Vec<String>, MigrationError> {
        Ok(table_names(&self.conn)?)
    }

    pub fn column_names(&self, table: &str) -> Result<Vec<String>, MigrationError> {
        Ok(column_names(&self.conn, table)?)
    }
}

/// Writes the meta version stamp; running it twice with the same version is
/// a no-op the second time.
pub fn write_version_stamp(conn: &Connection, version: Version) -> Result<(), rusqlite::Error> {
    let rendered = version.to_string();
    let changed = conn.execute(
        &format!("UPDATE {META_TABLE} SET value = ?2 WHERE key = ?1"),
        params![VERSION_KEY, rendered],
    )?;
    if changed == 0 {
        conn.execute(
            &format!("INSERT INTO {META_TABLE} (key, value) VALUES (?1, ?2)"),
            params![VERSION_KEY, rendered],
        )?;
    }
    Ok(())
}

pub(crate) fn table_names(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut statement = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    let names = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub(crate) fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut statement = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = statement.query_map([], |row| row.get::<_, String>(1))?;
    let names = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
