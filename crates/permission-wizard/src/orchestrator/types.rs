use std::collections::BTreeMap;

use serde::Serialize;

use crate::classifier::Decision;
use crate::config::Criticality;
use crate::error::WizardError;
use crate::permission::PermissionId;
use crate::phase::Phase;
use crate::restart::RestartDisposition;

/// In-memory working state for one configured permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionState {
    pub decision: Decision,
    pub criticality: Criticality,
    pub restart_required: bool,
    /// Lifetime attempts, as persisted in the ledger.
    pub attempts: u32,
    /// Attempts made during the current run; bounds the retry budget.
    pub run_attempts: u32,
}

impl PermissionState {
    pub(crate) fn new(criticality: Criticality) -> Self {
        Self {
            decision: Decision::Unknown,
            criticality,
            restart_required: false,
            attempts: 0,
            run_attempts: 0,
        }
    }

    pub fn is_effective_grant(&self) -> bool {
        self.decision == Decision::Granted && !self.restart_required
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub permission: PermissionId,
    pub decision: Decision,
    pub attempt: u32,
    pub restart_required: bool,
    /// The trigger failed on a soft step and the step was skipped.
    pub skipped: bool,
    pub cancelled: bool,
    /// The step should run once more later in the sequence.
    pub requeue: bool,
    pub(crate) persist_error: Option<WizardError>,
}

impl StepOutcome {
    pub(crate) fn new(permission: PermissionId, decision: Decision, attempt: u32) -> Self {
        Self {
            permission,
            decision,
            attempt,
            restart_required: false,
            skipped: false,
            cancelled: false,
            requeue: false,
            persist_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WizardOutcome {
    pub phase: Phase,
    pub decisions: BTreeMap<PermissionId, Decision>,
    pub cancelled: bool,
    #[serde(skip)]
    pub restart: Option<RestartDisposition>,
}

impl WizardOutcome {
    pub fn decision(&self, permission: PermissionId) -> Option<Decision> {
        self.decisions.get(&permission).copied()
    }
}

/// Point-in-time view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct WizardSnapshot {
    pub phase: Phase,
    pub permissions: BTreeMap<PermissionId, PermissionState>,
    pub unpersisted: Vec<PermissionId>,
}
