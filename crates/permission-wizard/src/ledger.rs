//! Durable record of per-permission outcomes and the wizard phase.

pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classifier::Decision;
use crate::error::WizardResult;
use crate::permission::PermissionId;
use crate::phase::Phase;
use crate::utils::time::now_secs;

pub use file::FileLedger;
pub use memory::MemoryLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub permission: PermissionId,
    pub decision: Decision,
    pub last_checked_at: u64,
    #[serde(default)]
    pub restart_required: bool,
    /// Completed attempts for this permission, retries included.
    #[serde(default)]
    pub attempts: u32,
}

impl LedgerRecord {
    pub fn new(permission: PermissionId, decision: Decision) -> Self {
        Self {
            permission,
            decision,
            last_checked_at: now_secs(),
            restart_required: false,
            attempts: 0,
        }
    }

    pub fn with_restart_required(mut self, restart_required: bool) -> Self {
        self.restart_required = restart_required;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// The persisted wizard-phase record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardState {
    pub phase: Phase,
    pub updated_at: u64,
}

impl WizardState {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            updated_at: now_secs(),
        }
    }
}

/// Writes must be atomic per record: a reader sees either the previous or
/// the new record, never a partial one.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, permission: PermissionId) -> WizardResult<Option<LedgerRecord>>;
    async fn put(&self, permission: PermissionId, record: &LedgerRecord) -> WizardResult<()>;
    /// An empty ledger reports [`Phase::FirstRun`].
    async fn get_wizard_phase(&self) -> WizardResult<Phase>;
    async fn set_wizard_phase(&self, phase: Phase) -> WizardResult<()>;
    async fn records(&self) -> WizardResult<Vec<LedgerRecord>>;
    async fn clear(&self) -> WizardResult<()>;
}

pub type SharedLedger = Arc<dyn LedgerStore>;
