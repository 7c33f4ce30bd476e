use crate::executor::Migrator;
use crate::{LegacyStore, MigrationError};
use serde::Serialize;
use tracing::warn;
use trumig_core::Version;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Compatibility {
    Current { version: String },
    Migratable { version: String, checkpoint: Version },
    Unmigratable { version: String, checkpoint: Version },
}

impl Compatibility {
    pub fn is_current(&self) -> bool {
        matches!(self, Compatibility::Current { .. })
    }

    pub fn advice(&self) -> String {
        match self {
            Compatibility::Current { version } => {
                format!("store version {version} matches the current release")
            }
            Compatibility::Migratable {
                version,
                checkpoint,
            } => format!(
                "store version {version} (compatible with {checkpoint}) is older than the current \
                 release; run `trumig migrate` to upgrade it"
            ),
            Compatibility::Unmigratable {
                version,
                checkpoint,
            } => format!(
                "store version {version} (compatible with {checkpoint}) cannot be migrated to the \
                 current release; reset the store to start fresh"
            ),
        }
    }
}

impl Migrator {
    /// Classifies the store without touching it.
    pub fn assess(&self, store: &LegacyStore) -> Result<Compatibility, MigrationError> {
        let (version, parsed) = store.current_version()?;
        let checkpoint = self.resolve(&version, parsed)?;
        if checkpoint == self.graph().newest() {
            return Ok(Compatibility::Current { version });
        }
        if self.graph().has_path_to_latest(checkpoint) {
            Ok(Compatibility::Migratable {
                version,
                checkpoint,
            })
        } else {
            Ok(Compatibility::Unmigratable {
                version,
                checkpoint,
            })
        }
    }

    /// Fails on any store that is not current, or only logs a warning when
    /// `warn_only` is set.
    pub fn ensure_compatible(
        &self,
        store: &LegacyStore,
        warn_only: bool,
    ) -> Result<Compatibility, MigrationError> {
        let compatibility = self.assess(store)?;
        if compatibility.is_current() {
            return Ok(compatibility);
        }
        let message = compatibility.advice();
        if warn_only {
            warn!(%message, "store is not compatible with the current release");
            return Ok(compatibility);
        }
        Err(MigrationError::IncompatibleStore { message })
    }
}
