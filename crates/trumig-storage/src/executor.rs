use crate::backup::{snapshot, BackupRecord};
use crate::steps::{builtin_graph, MigrationStep, StepError};
use crate::validator::{validate_store, ValidationSummary};
use crate::{write_version_stamp, BackupHint, LegacyStore, MigrationError};
use serde::Serialize;
use tracing::{error, info};
use trumig_core::{PlannedStep, UpgradeGraph, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum MigrationState {
    Idle,
    Resolved,
    PlanValidated,
    BackedUp,
    Stepping(usize),
    Validating,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSummary {
    pub name: &'static str,
    pub from: Version,
    pub to: Version,
}

impl From<&PlannedStep<'_, MigrationStep>> for StepSummary {
    fn from(planned: &PlannedStep<'_, MigrationStep>) -> Self {
        Self {
            name: planned.step.name,
            from: planned.from,
            to: planned.to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub stored_version: String,
    pub checkpoint: Version,
    pub target: Version,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub stored_version: String,
    pub checkpoint: Version,
    pub target: Version,
    pub steps: Vec<StepSummary>,
    pub backup: BackupRecord,
    pub validation: ValidationSummary,
    pub states: Vec<MigrationState>,
}

struct RunContext {
    states: Vec<MigrationState>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            states: vec![MigrationState::Idle],
        }
    }

    fn enter(&mut self, state: MigrationState) {
        self.states.push(state);
    }

    fn fail(&mut self, err: MigrationError) -> MigrationError {
        self.enter(MigrationState::Failed);
        error!(error = %err, states = ?self.states, "migration failed");
        err
    }
}

pub struct Migrator {
    graph: UpgradeGraph<MigrationStep>,
}

impl Migrator {
    pub fn new(graph: UpgradeGraph<MigrationStep>) -> Self {
        Self { graph }
    }

    pub fn builtin() -> Result<Self, MigrationError> {
        Ok(Self::new(builtin_graph()?))
    }

    pub fn graph(&self) -> &UpgradeGraph<MigrationStep> {
        &self.graph
    }

    pub(crate) fn resolve(&self, raw: &str, version: Version) -> Result<Version, MigrationError> {
        self.graph
            .resolve(version)
            .ok_or_else(|| MigrationError::UnsupportedVersion {
                version: raw.to_string(),
            })
    }

    fn ensure_path(&self, raw: &str, checkpoint: Version) -> Result<(), MigrationError> {
        if self.graph.has_path_to_latest(checkpoint) {
            return Ok(());
        }
        Err(MigrationError::NoMigrationPath {
            version: raw.to_string(),
            checkpoint,
            latest: self.graph.newest(),
        })
    }

    /// Resolves the stored version and lists the steps a run would apply.
    /// Nothing is written.
    pub fn plan(&self, store: &LegacyStore) -> Result<MigrationPlan, MigrationError> {
        let (stored_version, version) = store.current_version()?;
        let checkpoint = self.resolve(&stored_version, version)?;
        self.ensure_path(&stored_version, checkpoint)?;
        let steps = self
            .graph
            .plan_path(checkpoint)
            .iter()
            .map(StepSummary::from)
            .collect();
        Ok(MigrationPlan {
            stored_version,
            checkpoint,
            target: self.graph.newest(),
            steps,
        })
    }

    pub fn run(&self, store: &LegacyStore) -> Result<MigrationReport, MigrationError> {
        let mut ctx = RunContext::new();
        match self.run_with(store, &mut ctx) {
            Ok(mut report) => {
                ctx.enter(MigrationState::Complete);
                report.states = ctx.states;
                info!(target_version = %report.target, "migration complete");
                Ok(report)
            }
            Err(err) => Err(ctx.fail(err)),
        }
    }

    fn run_with(
        &self,
        store: &LegacyStore,
        ctx: &mut RunContext,
    ) -> Result<MigrationReport, MigrationError> {
        let (stored_version, version) = store.current_version()?;
        let checkpoint = self.resolve(&stored_version, version)?;
        ctx.enter(MigrationState::Resolved);
        info!(stored = %stored_version, %checkpoint, "resolved store version");

        self.ensure_path(&stored_version, checkpoint)?;
        ctx.enter(MigrationState::PlanValidated);

        let backup = snapshot(store)?;
        ctx.enter(MigrationState::BackedUp);

        let plan = self.graph.plan_path(checkpoint);
        let mut steps = Vec::with_capacity(plan.len());
        for (index, planned) in plan.iter().enumerate() {
            ctx.enter(MigrationState::Stepping(index));
            self.apply_step(store, planned, &backup)?;
            info!(
                step = planned.step.name,
                from = %planned.from,
                to = %planned.to,
                "applied migration step"
            );
            steps.push(StepSummary::from(planned));
        }

        ctx.enter(MigrationState::Validating);
        let validation = validate_store(store).map_err(|issue| MigrationError::ValidationFailure {
            issue,
            backup: BackupHint(Some(backup.backup.clone())),
        })?;
        info!(
            columns = validation.columns.len(),
            checked = validation.checked(),
            skipped = validation.skipped(),
            "validated migrated store"
        );

        Ok(MigrationReport {
            stored_version,
            checkpoint,
            target: self.graph.newest(),
            steps,
            backup,
            validation,
            states: Vec::new(),
        })
    }

    fn apply_step(
        &self,
        store: &LegacyStore,
        planned: &PlannedStep<'_, MigrationStep>,
        backup: &BackupRecord,
    ) -> Result<(), MigrationError> {
        let failure = |source| MigrationError::StepFailure {
            step: planned.step.name,
            from: planned.from,
            to: planned.to,
            backup: backup.backup.clone(),
            source,
        };
        let tx = store
            .transaction()
            .map_err(StepError::transaction("begin"))
            .map_err(failure)?;
        planned.step.run(&tx).map_err(failure)?;
        write_version_stamp(&tx, planned.to)
            .map_err(StepError::transaction("stamp"))
            .map_err(failure)?;
        tx.commit()
            .map_err(StepError::transaction("commit"))
            .map_err(failure)?;
        Ok(())
    }
}

/// Brings the store up to the newest checkpoint with the built-in steps.
pub fn migrate(store: &LegacyStore) -> Result<MigrationReport, MigrationError> {
    Migrator::builtin()?.run(store)
}
