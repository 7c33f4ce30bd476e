use crate::{LegacyStore, MigrationError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Copies the store file to a fresh sibling. Neither file is ever removed.
pub fn snapshot(store: &LegacyStore) -> Result<BackupRecord, MigrationError> {
    let original = store
        .path()
        .ok_or(MigrationError::BackupUnavailable)?
        .to_path_buf();

    store
        .connection()
        .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;

    let created_at = Utc::now();
    let backup = backup_path(&original, created_at, Uuid::new_v4());
    copy_to_new_file(&original, &backup).map_err(|source| MigrationError::Backup {
        original: original.clone(),
        target: backup.clone(),
        source,
    })?;

    info!(
        original = %original.display(),
        backup = %backup.display(),
        "saved original store"
    );

    Ok(BackupRecord {
        original,
        backup,
        created_at,
    })
}

fn backup_path(original: &Path, created_at: DateTime<Utc>, token: Uuid) -> PathBuf {
    let name = original
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    original.with_file_name(format!(
        "{name}_saved_{}_{}",
        created_at.format("%Y%m%dT%H%M%SZ"),
        token.simple()
    ))
}

fn copy_to_new_file(source: &Path, target: &Path) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut output = OpenOptions::new().write(true).create_new(true).open(target)?;
    let copied = io::copy(&mut input, &mut output).and_then(|copied| {
        output.sync_all()?;
        Ok(copied)
    });
    if copied.is_err() {
        // A truncated copy must not pass for a backup.
        drop(output);
        let _ = fs::remove_file(target);
    }
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release_schema::create_v0_1_2;
    use chrono::TimeZone;
    use rusqlite::Connection;

    #[test]
    fn backup_names_are_siblings_with_unique_suffixes() {
        let at = Utc
            .with_ymd_and_hms(2026, 2, 23, 14, 0, 0)
            .single()
            .expect("valid timestamp");
        let original = Path::new("/data/default.sqlite");
        let first = backup_path(original, at, Uuid::new_v4());
        let second = backup_path(original, at, Uuid::new_v4());

        assert_eq!(first.parent(), original.parent());
        assert!(first
            .to_string_lossy()
            .starts_with("/data/default.sqlite_saved_20260223T140000Z_"));
        assert_ne!(first, second);
    }

    #[test]
    fn snapshot_copies_bytes_and_keeps_original() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("default.sqlite");
        {
            let conn = Connection::open(&path).expect("create store");
            create_v0_1_2(&conn, "0.1.2").expect("seed schema");
        }
        let before = std::fs::read(&path).expect("read original");

        let store = LegacyStore::open(&path).expect("open store");
        let first = snapshot(&store).expect("first snapshot");
        let second = snapshot(&store).expect("second snapshot");

        assert_ne!(first.backup, second.backup);
        assert_eq!(first.original, path);
        assert_eq!(std::fs::read(&first.backup).expect("read backup"), before);
        assert_eq!(std::fs::read(&path).expect("read original"), before);
    }

    #[test]
    fn in_memory_stores_cannot_be_backed_up() {
        let store = LegacyStore::open_in_memory().expect("open store");
        assert!(matches!(
            snapshot(&store),
            Err(MigrationError::BackupUnavailable)
        ));
    }

    #[test]
    fn failed_copy_leaves_no_partial_backup() {
        let dir = tempfile::tempdir().expect("temp dir");
        let unreadable = dir.path().join("not-a-file");
        std::fs::create_dir(&unreadable).expect("create dir");
        let target = dir.path().join("copy");

        assert!(copy_to_new_file(&unreadable, &target).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn existing_target_is_never_overwritten() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = dir.path().join("a");
        let target = dir.path().join("b");
        std::fs::write(&source, b"new").expect("write source");
        std::fs::write(&target, b"old").expect("write target");

        assert!(copy_to_new_file(&source, &target).is_err());
        assert_eq!(std::fs::read(&target).expect("read target"), b"old");
    }
}
