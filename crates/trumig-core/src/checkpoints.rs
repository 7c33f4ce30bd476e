use crate::{ContractError, Version};
use std::collections::BTreeMap;

pub const MIGRATION_UNKNOWN: &str = "unknown[db_migration]";

pub const V0_1_2: Version = Version::new(0, 1, 2);
pub const V0_2_0: Version = Version::new(0, 2, 0);
pub const V0_3_0: Version = Version::new(0, 3, 0);
pub const V0_9_0: Version = Version::new(0, 9, 0);
pub const V0_19_0: Version = Version::new(0, 19, 0);

/// Versions with explicit migration logic, newest first.
pub const CHECKPOINTS: [Version; 5] = [V0_19_0, V0_9_0, V0_3_0, V0_2_0, V0_1_2];

pub fn newest_checkpoint() -> Version {
    CHECKPOINTS[0]
}

/// Newest checkpoint that `version` is at least as new as. A smaller
/// component at the first position where the two differ rules the
/// checkpoint out; the walk then restarts on the next older one.
pub fn resolve_checkpoint(checkpoints: &[Version], version: Version) -> Option<Version> {
    checkpoints.iter().copied().find(|checkpoint| {
        for (wanted, known) in version.components().into_iter().zip(checkpoint.components()) {
            if wanted != known {
                return wanted > known;
            }
        }
        true
    })
}

#[derive(Debug)]
pub struct PlannedStep<'a, S> {
    pub from: Version,
    pub to: Version,
    pub step: &'a S,
}

#[derive(Debug, Clone)]
pub struct UpgradeGraph<S> {
    checkpoints: Vec<Version>,
    edges: BTreeMap<Version, (Version, S)>,
}

impl<S> UpgradeGraph<S> {
    pub fn new(checkpoints: Vec<Version>) -> Result<Self, ContractError> {
        if checkpoints.is_empty() || checkpoints.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(ContractError::InvalidCheckpoints);
        }
        Ok(Self {
            checkpoints,
            edges: BTreeMap::new(),
        })
    }

    pub fn with_edge(mut self, from: Version, to: Version, step: S) -> Result<Self, ContractError> {
        let invalid = |reason| ContractError::InvalidEdge { from, to, reason };
        if !self.checkpoints.contains(&from) {
            return Err(invalid("source is not a checkpoint"));
        }
        if !self.checkpoints.contains(&to) {
            return Err(invalid("target is not a checkpoint"));
        }
        if to <= from {
            return Err(invalid("target must be newer than source"));
        }
        if self.edges.contains_key(&from) {
            return Err(invalid("source already has an outgoing edge"));
        }
        self.edges.insert(from, (to, step));
        Ok(self)
    }

    pub fn checkpoints(&self) -> &[Version] {
        &self.checkpoints
    }

    pub fn newest(&self) -> Version {
        self.checkpoints[0]
    }

    pub fn resolve(&self, version: Version) -> Option<Version> {
        resolve_checkpoint(&self.checkpoints, version)
    }

    pub fn has_path_to_latest(&self, checkpoint: Version) -> bool {
        let mut current = checkpoint;
        while let Some((next, _)) = self.edges.get(&current) {
            current = *next;
        }
        current == self.newest()
    }

    pub fn plan_path(&self, checkpoint: Version) -> Vec<PlannedStep<'_, S>> {
        let mut plan = Vec::new();
        let mut current = checkpoint;
        while let Some((next, step)) = self.edges.get(&current) {
            plan.push(PlannedStep {
                from: current,
                to: *next,
                step,
            });
            current = *next;
        }
        plan
    }
}
