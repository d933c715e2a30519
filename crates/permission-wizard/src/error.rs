use crate::permission::PermissionId;

/// Unified error type for the permission wizard.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WizardError {
    /// A prober could not even issue its request.
    #[error("trigger failed for {permission}: {message}")]
    Trigger {
        permission: PermissionId,
        message: String,
    },

    /// A probe did not answer within its bounded timeout.
    #[error("probe timed out for {permission} after {elapsed_ms}ms")]
    ProbeTimeout {
        permission: PermissionId,
        elapsed_ms: u64,
    },

    /// A probe failed outright.
    #[error("probe failed for {permission}: {message}")]
    Probe {
        permission: PermissionId,
        message: String,
    },

    #[error("ledger write failed for {key}: {message}")]
    LedgerWrite { key: String, message: String },

    #[error("ledger read failed for {key}: {message}")]
    LedgerRead { key: String, message: String },

    /// Malformed configuration. Only raised while loading or constructing.
    #[error("invalid config: {0}")]
    Config(String),

    #[error("restart handoff failed: {0}")]
    Restart(String),
}

impl WizardError {
    pub fn trigger(permission: PermissionId, message: impl Into<String>) -> Self {
        Self::Trigger {
            permission,
            message: message.into(),
        }
    }

    pub fn probe(permission: PermissionId, message: impl Into<String>) -> Self {
        Self::Probe {
            permission,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Trigger and probe failures are recovered as unknown evidence.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Trigger { .. } | Self::ProbeTimeout { .. } | Self::Probe { .. }
        )
    }
}

/// Result type alias using [`WizardError`].
pub type WizardResult<T> = Result<T, WizardError>;
