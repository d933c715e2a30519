use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::permission::PermissionId;
use crate::utils::time::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UIEventType {
    PermissionRequested,
    PermissionResolved,
    RestartRequired,
    WizardCompleted,
    WizardLimited,
    WizardCancelled,
}

/// Outward notification for the dialog/tray layer. Never read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: UIEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<PermissionId>,
    pub payload: Value,
    pub emitted_at: u64,
}

impl UIEvent {
    pub fn new(event_type: UIEventType, permission: Option<PermissionId>, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_type,
            permission,
            payload,
            emitted_at: now_secs(),
        }
    }

    pub fn for_permission(event_type: UIEventType, permission: PermissionId, payload: Value) -> Self {
        Self::new(event_type, Some(permission), payload)
    }

    pub fn wizard(event_type: UIEventType, payload: Value) -> Self {
        Self::new(event_type, None, payload)
    }
}
