mod add_multi_result;
mod default_missing_costs;
mod normalize_class_info;
mod rename_chain_to_app;

use crate::{quote_ident, META_TABLE};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use trumig_core::checkpoints::{V0_19_0, V0_1_2, V0_2_0, V0_3_0, V0_9_0};
use trumig_core::{ContractError, UpgradeGraph, CHECKPOINTS, MIGRATION_UNKNOWN};

pub type StepFn = fn(&Connection) -> Result<(), StepError>;

#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub name: &'static str,
    pub apply: StepFn,
}

impl MigrationStep {
    pub const fn new(name: &'static str, apply: StepFn) -> Self {
        Self { name, apply }
    }

    pub fn run(&self, conn: &Connection) -> Result<(), StepError> {
        (self.apply)(conn)
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("sqlite error on table {table}: {source}")]
    Sqlite {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("cannot rewrite {table}.{column} for row {row_key}: {reason}")]
    Payload {
        table: &'static str,
        column: &'static str,
        row_key: String,
        reason: String,
    },
    #[error("step transaction failed at {stage}: {source}")]
    Transaction {
        stage: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl StepError {
    pub fn sqlite(table: &'static str) -> impl Fn(rusqlite::Error) -> StepError {
        move |source| StepError::Sqlite { table, source }
    }

    pub(crate) fn transaction(stage: &'static str) -> impl Fn(rusqlite::Error) -> StepError {
        move |source| StepError::Transaction { stage, source }
    }

    pub fn table(&self) -> &'static str {
        match self {
            StepError::Sqlite { table, .. } | StepError::Payload { table, .. } => *table,
            StepError::Transaction { .. } => META_TABLE,
        }
    }

    pub fn column(&self) -> Option<&'static str> {
        match self {
            StepError::Sqlite { .. } | StepError::Transaction { .. } => None,
            StepError::Payload { column, .. } => Some(*column),
        }
    }
}

pub fn builtin_graph() -> Result<UpgradeGraph<MigrationStep>, ContractError> {
    UpgradeGraph::new(CHECKPOINTS.to_vec())?
        .with_edge(
            V0_1_2,
            V0_2_0,
            MigrationStep::new("rename_chain_to_app", rename_chain_to_app::migrate),
        )?
        .with_edge(
            V0_2_0,
            V0_3_0,
            MigrationStep::new("default_missing_costs", default_missing_costs::migrate),
        )?
        .with_edge(
            V0_3_0,
            V0_9_0,
            MigrationStep::new("add_multi_result", add_multi_result::migrate),
        )?
        .with_edge(
            V0_9_0,
            V0_19_0,
            MigrationStep::new("normalize_class_info", normalize_class_info::migrate),
        )
}

/// A JSON payload column addressed through its table's text primary key.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PayloadColumn {
    pub table: &'static str,
    pub key: &'static str,
    pub column: &'static str,
}

pub(crate) struct PayloadRow {
    pub key: String,
    pub payload: Value,
}

impl PayloadColumn {
    pub const fn new(table: &'static str, key: &'static str, column: &'static str) -> Self {
        Self { table, key, column }
    }

    pub fn error(&self, row_key: &str, reason: impl Into<String>) -> StepError {
        StepError::Payload {
            table: self.table,
            column: self.column,
            row_key: row_key.to_string(),
            reason: reason.into(),
        }
    }

    /// Loads every row holding a JSON payload; the unknown sentinel is skipped.
    pub fn load(&self, conn: &Connection) -> Result<Vec<PayloadRow>, StepError> {
        let sql = format!(
            "SELECT {}, {} FROM {}",
            quote_ident(self.key),
            quote_ident(self.column),
            quote_ident(self.table)
        );
        let mut statement = conn.prepare(&sql).map_err(StepError::sqlite(self.table))?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(StepError::sqlite(self.table))?;

        let mut loaded = Vec::new();
        for row in rows {
            let (key, raw) = row.map_err(StepError::sqlite(self.table))?;
            if raw == MIGRATION_UNKNOWN {
                continue;
            }
            let payload = serde_json::from_str(&raw)
                .map_err(|err| self.error(&key, format!("invalid json: {err}")))?;
            loaded.push(PayloadRow { key, payload });
        }
        Ok(loaded)
    }

    pub fn store(&self, conn: &Connection, key: &str, payload: &Value) -> Result<(), StepError> {
        let raw = serde_json::to_string(payload)
            .map_err(|err| self.error(key, format!("serialization failed: {err}")))?;
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote_ident(self.table),
            quote_ident(self.column),
            quote_ident(self.key)
        );
        conn.execute(&sql, params![raw, key])
            .map_err(StepError::sqlite(self.table))?;
        Ok(())
    }

    pub fn rewrite(
        &self,
        conn: &Connection,
        mut rewrite: impl FnMut(Value) -> Result<Value, String>,
    ) -> Result<usize, StepError> {
        let rows = self.load(conn)?;
        let total = rows.len();
        for row in rows {
            let rewritten = rewrite(row.payload).map_err(|reason| self.error(&row.key, reason))?;
            self.store(conn, &row.key, &rewritten)?;
        }
        debug!(
            table = self.table,
            column = self.column,
            rows = total,
            "rewrote payload column"
        );
        Ok(total)
    }
}

pub(crate) fn table_exists(conn: &Connection, table: &'static str) -> Result<bool, StepError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()
        .map_err(StepError::sqlite(table))?;
    Ok(found.is_some())
}
