//! Pure mapping from probe evidence to a normalized decision.
//!
//! Anything partial, conflicting or aimed at another permission lands on
//! `Unknown`; only an explicit observation may produce `Granted` or `Denied`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::permission::PermissionId;
use crate::probe::{AutomationStatus, EvidenceDetail, ProbeEvidence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Granted,
    Denied,
    Restricted,
    Unknown,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Granted => "granted",
            Decision::Denied => "denied",
            Decision::Restricted => "restricted",
            Decision::Unknown => "unknown",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, Decision::Unknown)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Classifier = fn(&ProbeEvidence) -> Decision;

pub fn get_classifier(permission: PermissionId) -> Classifier {
    match permission {
        PermissionId::Accessibility => classify_accessibility,
        PermissionId::InputMonitoring => classify_input_monitoring,
        PermissionId::ScreenCapture => classify_screen_capture,
        PermissionId::MessagesAccess => classify_messages_access,
        PermissionId::Automation => classify_automation,
        PermissionId::FullDiskAccess => classify_full_disk_access,
    }
}

/// Shorthand for `get_classifier(evidence.permission)(evidence)`.
pub fn classify(evidence: &ProbeEvidence) -> Decision {
    get_classifier(evidence.permission)(evidence)
}

fn restricted(evidence: &ProbeEvidence) -> bool {
    evidence.managed_restriction == Some(true)
}

fn from_flag(flag: Option<bool>) -> Decision {
    match flag {
        Some(true) => Decision::Granted,
        Some(false) => Decision::Denied,
        None => Decision::Unknown,
    }
}

/// A primary flag that only grants once the secondary check has run and
/// passed. A failed or missing secondary check leaves the grant unknown.
fn from_confirmed_flag(primary: Option<bool>, confirmation: Option<bool>) -> Decision {
    match (primary, confirmation) {
        (Some(false), _) => Decision::Denied,
        (Some(true), Some(true)) => Decision::Granted,
        (Some(true), _) | (None, _) => Decision::Unknown,
    }
}

fn classify_accessibility(evidence: &ProbeEvidence) -> Decision {
    if evidence.permission != PermissionId::Accessibility {
        return Decision::Unknown;
    }
    if restricted(evidence) {
        return Decision::Restricted;
    }
    match &evidence.detail {
        EvidenceDetail::Accessibility { trusted } => from_flag(*trusted),
        _ => Decision::Unknown,
    }
}

fn classify_input_monitoring(evidence: &ProbeEvidence) -> Decision {
    if evidence.permission != PermissionId::InputMonitoring {
        return Decision::Unknown;
    }
    if restricted(evidence) {
        return Decision::Restricted;
    }
    match &evidence.detail {
        EvidenceDetail::InputMonitoring {
            listen_access,
            event_tap_ok,
        } => from_confirmed_flag(*listen_access, *event_tap_ok),
        _ => Decision::Unknown,
    }
}

fn classify_screen_capture(evidence: &ProbeEvidence) -> Decision {
    if evidence.permission != PermissionId::ScreenCapture {
        return Decision::Unknown;
    }
    if restricted(evidence) {
        return Decision::Restricted;
    }
    match &evidence.detail {
        EvidenceDetail::ScreenCapture {
            preflight,
            capture_ok,
        } => from_confirmed_flag(*preflight, *capture_ok),
        _ => Decision::Unknown,
    }
}

fn classify_messages_access(evidence: &ProbeEvidence) -> Decision {
    if evidence.permission != PermissionId::MessagesAccess {
        return Decision::Unknown;
    }
    if restricted(evidence) {
        return Decision::Restricted;
    }
    match &evidence.detail {
        EvidenceDetail::MessagesAccess { messages_access_ok } => from_flag(*messages_access_ok),
        _ => Decision::Unknown,
    }
}

fn classify_automation(evidence: &ProbeEvidence) -> Decision {
    if evidence.permission != PermissionId::Automation {
        return Decision::Unknown;
    }
    if restricted(evidence) {
        return Decision::Restricted;
    }
    match &evidence.detail {
        EvidenceDetail::Automation { status } => match status {
            Some(AutomationStatus::Authorized) => Decision::Granted,
            Some(AutomationStatus::Denied) => Decision::Denied,
            Some(AutomationStatus::RequiresConsent)
            | Some(AutomationStatus::TargetNotRunning)
            | None => Decision::Unknown,
        },
        _ => Decision::Unknown,
    }
}

fn classify_full_disk_access(evidence: &ProbeEvidence) -> Decision {
    if evidence.permission != PermissionId::FullDiskAccess {
        return Decision::Unknown;
    }
    if restricted(evidence) {
        return Decision::Restricted;
    }
    match &evidence.detail {
        EvidenceDetail::FullDiskAccess { protected_read_ok } => from_flag(*protected_read_ok),
        _ => Decision::Unknown,
    }
}
