pub mod checkpoints;
pub mod payload;
pub mod schema;
pub mod version;

pub use checkpoints::{
    newest_checkpoint, resolve_checkpoint, PlannedStep, UpgradeGraph, CHECKPOINTS,
    MIGRATION_UNKNOWN,
};
pub use payload::{ensure_field, rename_field, rename_key, rename_value, take_field, PayloadMapper};
pub use schema::PayloadShape;
pub use version::Version;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("malformed version {input:?}: {reason}")]
    MalformedVersion { input: String, reason: &'static str },
    #[error("checkpoint list must be non-empty and strictly decreasing")]
    InvalidCheckpoints,
    #[error("invalid upgrade edge {from} -> {to}: {reason}")]
    InvalidEdge {
        from: Version,
        to: Version,
        reason: &'static str,
    },
    #[error("payload does not match {shape} shape: {reason}")]
    PayloadShape { shape: &'static str, reason: String },
    #[error("serialized column migration not implemented: {column}")]
    UnknownPayloadColumn { column: String },
}
