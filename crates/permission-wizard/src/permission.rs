//! The closed set of OS-level permissions the wizard knows how to acquire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WizardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionId {
    Accessibility,
    InputMonitoring,
    ScreenCapture,
    MessagesAccess,
    Automation,
    FullDiskAccess,
}

impl PermissionId {
    pub const ALL: [PermissionId; 6] = [
        PermissionId::Accessibility,
        PermissionId::InputMonitoring,
        PermissionId::ScreenCapture,
        PermissionId::MessagesAccess,
        PermissionId::Automation,
        PermissionId::FullDiskAccess,
    ];

    /// Stable identifier used as the ledger key.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionId::Accessibility => "accessibility",
            PermissionId::InputMonitoring => "input_monitoring",
            PermissionId::ScreenCapture => "screen_capture",
            PermissionId::MessagesAccess => "messages_access",
            PermissionId::Automation => "automation",
            PermissionId::FullDiskAccess => "full_disk_access",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PermissionId::Accessibility => "Accessibility",
            PermissionId::InputMonitoring => "Input Monitoring",
            PermissionId::ScreenCapture => "Screen Recording",
            PermissionId::MessagesAccess => "Messages Access",
            PermissionId::Automation => "Automation",
            PermissionId::FullDiskAccess => "Full Disk Access",
        }
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionId {
    type Err = WizardError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PermissionId::ALL
            .iter()
            .copied()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| WizardError::config(format!("unknown permission id {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form_matches_serde() {
        for permission in PermissionId::ALL {
            let encoded = serde_json::to_value(permission).expect("serialize");
            assert_eq!(encoded, serde_json::json!(permission.as_str()));
            let parsed: PermissionId = permission.as_str().parse().expect("parse");
            assert_eq!(parsed, permission);
        }
    }

    #[test]
    fn unknown_id_is_config_error() {
        let err = "camera".parse::<PermissionId>().expect_err("unknown id");
        assert!(matches!(err, WizardError::Config(_)));
    }
}
