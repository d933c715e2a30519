//! JSON-file ledger.
//!
//! Layout under the root directory:
//! - `wizard.json` holds the wizard phase
//! - `permissions/<permission>.json` holds one record per permission
//!
//! Every write lands in a sibling `.tmp` file first and is renamed over the
//! target, so a reader never sees a half-written record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{WizardError, WizardResult};
use crate::ledger::{LedgerRecord, LedgerStore, WizardState};
use crate::permission::PermissionId;
use crate::phase::Phase;

pub const WIZARD_STATE_FILENAME: &str = "wizard.json";
pub const PERMISSIONS_DIR: &str = "permissions";

#[derive(Debug, Clone)]
pub struct FileLedger {
    root: PathBuf,
}

impl FileLedger {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, permission: PermissionId) -> PathBuf {
        self.root
            .join(PERMISSIONS_DIR)
            .join(format!("{}.json", permission.as_str()))
    }

    fn wizard_path(&self) -> PathBuf {
        self.root.join(WIZARD_STATE_FILENAME)
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> WizardResult<()> {
        let key = path.display().to_string();
        let write_error = |message: String| WizardError::LedgerWrite {
            key: key.clone(),
            message,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                write_error(format!(
                    "failed to create ledger directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
        let serialized = serde_json::to_vec_pretty(value)
            .map_err(|error| write_error(format!("serialize error: {error}")))?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serialized)
            .await
            .map_err(|error| write_error(format!("failed to write temp file: {error}")))?;
        if let Err(error) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_error(format!("failed to rename temp file: {error}")));
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> WizardResult<Option<T>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(WizardError::LedgerRead {
                    key: path.display().to_string(),
                    message: error.to_string(),
                })
            }
        };
        let value = serde_json::from_slice(&bytes).map_err(|error| WizardError::LedgerRead {
            key: path.display().to_string(),
            message: format!("parse error: {error}"),
        })?;
        Ok(Some(value))
    }

    async fn remove(path: &Path) -> WizardResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(WizardError::LedgerWrite {
                key: path.display().to_string(),
                message: format!("failed to remove: {error}"),
            }),
        }
    }
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn get(&self, permission: PermissionId) -> WizardResult<Option<LedgerRecord>> {
        Self::read_json(&self.record_path(permission)).await
    }

    async fn put(&self, permission: PermissionId, record: &LedgerRecord) -> WizardResult<()> {
        if record.permission != permission {
            return Err(WizardError::LedgerWrite {
                key: permission.to_string(),
                message: format!("record belongs to {}", record.permission),
            });
        }
        Self::write_json(&self.record_path(permission), record).await
    }

    async fn get_wizard_phase(&self) -> WizardResult<Phase> {
        let state: Option<WizardState> = Self::read_json(&self.wizard_path()).await?;
        Ok(state.map(|state| state.phase).unwrap_or(Phase::FirstRun))
    }

    async fn set_wizard_phase(&self, phase: Phase) -> WizardResult<()> {
        Self::write_json(&self.wizard_path(), &WizardState::new(phase)).await
    }

    async fn records(&self) -> WizardResult<Vec<LedgerRecord>> {
        let mut records = Vec::new();
        for permission in PermissionId::ALL {
            if let Some(record) = self.get(permission).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn clear(&self) -> WizardResult<()> {
        for permission in PermissionId::ALL {
            Self::remove(&self.record_path(permission)).await?;
        }
        Self::remove(&self.wizard_path()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Decision;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_and_reads_records() {
        let dir = tempdir().expect("tempdir");
        let ledger = FileLedger::new(dir.path().to_path_buf());
        let record = LedgerRecord::new(PermissionId::MessagesAccess, Decision::Denied)
            .with_attempts(2);
        ledger
            .put(PermissionId::MessagesAccess, &record)
            .await
            .expect("put");

        let loaded = ledger
            .get(PermissionId::MessagesAccess)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(loaded, record);
        assert!(dir
            .path()
            .join("permissions")
            .join("messages_access.json")
            .exists());
        assert!(!dir
            .path()
            .join("permissions")
            .join("messages_access.json.tmp")
            .exists());
    }

    #[tokio::test]
    async fn missing_state_is_first_run() {
        let dir = tempdir().expect("tempdir");
        let ledger = FileLedger::new(dir.path().join("nested"));
        assert_eq!(ledger.get_wizard_phase().await.expect("phase"), Phase::FirstRun);
        assert!(ledger.records().await.expect("records").is_empty());
    }

    #[tokio::test]
    async fn phase_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        {
            let ledger = FileLedger::new(dir.path().to_path_buf());
            ledger
                .set_wizard_phase(Phase::RestartPending)
                .await
                .expect("set phase");
            let record = LedgerRecord::new(PermissionId::InputMonitoring, Decision::Granted)
                .with_restart_required(true);
            ledger
                .put(PermissionId::InputMonitoring, &record)
                .await
                .expect("put");
        }
        let reopened = FileLedger::new(dir.path().to_path_buf());
        assert_eq!(
            reopened.get_wizard_phase().await.expect("phase"),
            Phase::RestartPending
        );
        let records = reopened.records().await.expect("records");
        assert_eq!(records.len(), 1);
        assert!(records[0].restart_required);
    }

    #[tokio::test]
    async fn corrupt_record_is_read_error() {
        let dir = tempdir().expect("tempdir");
        let ledger = FileLedger::new(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path().join("permissions")).expect("mkdir");
        std::fs::write(dir.path().join("permissions").join("automation.json"), b"{ nope")
            .expect("write");
        let err = ledger
            .get(PermissionId::Automation)
            .await
            .expect_err("corrupt");
        assert!(matches!(err, WizardError::LedgerRead { .. }));
    }

    #[tokio::test]
    async fn mismatched_record_rejected() {
        let dir = tempdir().expect("tempdir");
        let ledger = FileLedger::new(dir.path().to_path_buf());
        let record = LedgerRecord::new(PermissionId::Automation, Decision::Granted);
        let err = ledger
            .put(PermissionId::ScreenCapture, &record)
            .await
            .expect_err("mismatch");
        assert!(matches!(err, WizardError::LedgerWrite { .. }));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempdir().expect("tempdir");
        let ledger = FileLedger::new(dir.path().to_path_buf());
        ledger
            .put(
                PermissionId::Accessibility,
                &LedgerRecord::new(PermissionId::Accessibility, Decision::Granted),
            )
            .await
            .expect("put");
        ledger.set_wizard_phase(Phase::Completed).await.expect("phase");
        ledger.clear().await.expect("clear");
        ledger.clear().await.expect("clear twice");
        assert!(ledger.records().await.expect("records").is_empty());
        assert_eq!(ledger.get_wizard_phase().await.expect("phase"), Phase::FirstRun);
    }
}
