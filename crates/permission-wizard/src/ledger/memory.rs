use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::WizardResult;
use crate::ledger::{LedgerRecord, LedgerStore, WizardState};
use crate::permission::PermissionId;
use crate::phase::Phase;

/// In-process ledger. Loses everything on exit.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<BTreeMap<PermissionId, LedgerRecord>>,
    wizard: RwLock<Option<WizardState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get(&self, permission: PermissionId) -> WizardResult<Option<LedgerRecord>> {
        Ok(self.records.read().await.get(&permission).cloned())
    }

    async fn put(&self, permission: PermissionId, record: &LedgerRecord) -> WizardResult<()> {
        self.records.write().await.insert(permission, record.clone());
        Ok(())
    }

    async fn get_wizard_phase(&self) -> WizardResult<Phase> {
        Ok(self
            .wizard
            .read()
            .await
            .as_ref()
            .map(|state| state.phase)
            .unwrap_or(Phase::FirstRun))
    }

    async fn set_wizard_phase(&self, phase: Phase) -> WizardResult<()> {
        *self.wizard.write().await = Some(WizardState::new(phase));
        Ok(())
    }

    async fn records(&self) -> WizardResult<Vec<LedgerRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> WizardResult<()> {
        self.records.write().await.clear();
        *self.wizard.write().await = None;
        Ok(())
    }
}
