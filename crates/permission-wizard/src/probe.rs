//! Prober capability, probe evidence and the dispatch table that binds one
//! prober to each permission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::StepConfig;
use crate::error::{WizardError, WizardResult};
use crate::permission::PermissionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeLevel {
    /// Cheap cached recheck with no side effects.
    Light,
    /// Fresh OS query that also re-validates side effects.
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    Authorized,
    Denied,
    RequiresConsent,
    TargetNotRunning,
}

/// Permission-specific observations. Every field is optional; a field the
/// prober could not observe stays `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceDetail {
    Accessibility {
        trusted: Option<bool>,
    },
    InputMonitoring {
        listen_access: Option<bool>,
        event_tap_ok: Option<bool>,
    },
    ScreenCapture {
        preflight: Option<bool>,
        capture_ok: Option<bool>,
    },
    MessagesAccess {
        messages_access_ok: Option<bool>,
    },
    Automation {
        status: Option<AutomationStatus>,
    },
    FullDiskAccess {
        protected_read_ok: Option<bool>,
    },
    /// Nothing could be observed, e.g. after a timeout.
    Missing {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEvidence {
    pub permission: PermissionId,
    /// Set when a management profile or parental control locks the setting.
    #[serde(default)]
    pub managed_restriction: Option<bool>,
    pub detail: EvidenceDetail,
}

impl ProbeEvidence {
    pub fn new(permission: PermissionId, detail: EvidenceDetail) -> Self {
        Self {
            permission,
            managed_restriction: None,
            detail,
        }
    }

    pub fn missing(permission: PermissionId, reason: impl Into<String>) -> Self {
        Self::new(
            permission,
            EvidenceDetail::Missing {
                reason: reason.into(),
            },
        )
    }

    pub fn with_managed_restriction(mut self, restricted: bool) -> Self {
        self.managed_restriction = Some(restricted);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub evidence: ProbeEvidence,
    pub level: ProbeLevel,
    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn new(evidence: ProbeEvidence, level: ProbeLevel) -> Self {
        Self {
            evidence,
            level,
            observed_at: Utc::now(),
        }
    }

    /// Unknown evidence standing in for a failed or timed-out probe.
    pub fn unavailable(permission: PermissionId, level: ProbeLevel, error: &WizardError) -> Self {
        Self::new(ProbeEvidence::missing(permission, error.to_string()), level)
    }
}

/// Per-permission strategy for requesting and checking one OS permission.
///
/// Probers hold no orchestrator state; they receive the step configuration on
/// every call.
#[async_trait]
pub trait Prober: Send + Sync {
    fn permission(&self) -> PermissionId;

    /// Issues the request and returns immediately. Calling again before the
    /// user has answered must not stack a second prompt.
    async fn trigger(&self, step: &StepConfig) -> WizardResult<()>;

    /// Must honor an internal timeout and report missing evidence instead of
    /// hanging.
    async fn probe(&self, level: ProbeLevel, step: &StepConfig) -> WizardResult<ProbeResult>;
}

pub type SharedProber = Arc<dyn Prober>;

/// Races a probe against `limit`. The probe future is dropped on timeout, so
/// nothing it spawned through `.await` outlives the call.
pub async fn bounded_probe(
    prober: &dyn Prober,
    level: ProbeLevel,
    step: &StepConfig,
    limit: Duration,
) -> WizardResult<ProbeResult> {
    let started = Instant::now();
    match tokio::time::timeout(limit, prober.probe(level, step)).await {
        Ok(result) => result,
        Err(_) => Err(WizardError::ProbeTimeout {
            permission: step.permission,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
    }
}

/// Dispatch table from permission to its prober.
#[derive(Default, Clone)]
pub struct ProberRegistry {
    probers: HashMap<PermissionId, SharedProber>,
}

impl ProberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under the prober's own permission, replacing any earlier one.
    pub fn register(&mut self, prober: SharedProber) -> Option<SharedProber> {
        self.probers.insert(prober.permission(), prober)
    }

    pub fn with(mut self, prober: SharedProber) -> Self {
        self.register(prober);
        self
    }

    pub fn get(&self, permission: PermissionId) -> Option<SharedProber> {
        self.probers.get(&permission).cloned()
    }

    pub fn len(&self) -> usize {
        self.probers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probers.is_empty()
    }
}

/// Suppresses repeated triggers inside a window. Meant to be embedded in
/// prober implementations.
#[derive(Debug)]
pub struct TriggerDebounce {
    window: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl TriggerDebounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: Mutex::new(None),
        }
    }

    /// Returns true and records the time if a trigger may fire now.
    pub fn try_fire(&self) -> bool {
        let mut last = self
            .last_fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn reset(&self) {
        let mut last = self
            .last_fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Criticality, StepMode, StepTiming};

    struct SlowProber;

    #[async_trait]
    impl Prober for SlowProber {
        fn permission(&self) -> PermissionId {
            PermissionId::Automation
        }

        async fn trigger(&self, _step: &StepConfig) -> WizardResult<()> {
            Ok(())
        }

        async fn probe(&self, level: ProbeLevel, step: &StepConfig) -> WizardResult<ProbeResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ProbeResult::new(
                ProbeEvidence::new(
                    step.permission,
                    EvidenceDetail::Automation {
                        status: Some(AutomationStatus::Authorized),
                    },
                ),
                level,
            ))
        }
    }

    fn step() -> StepConfig {
        StepConfig {
            permission: PermissionId::Automation,
            mode: StepMode::AutoDialog,
            timing: StepTiming {
                grace_s: 0.0,
                poll_s: 1.0,
                deadline_s: 10.0,
            },
            criticality: Criticality::Hard,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_probe_times_out() {
        let err = bounded_probe(&SlowProber, ProbeLevel::Heavy, &step(), Duration::from_secs(2))
            .await
            .expect_err("timeout");
        assert!(matches!(
            err,
            WizardError::ProbeTimeout {
                permission: PermissionId::Automation,
                ..
            }
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn registry_keys_by_prober_permission() {
        let registry = ProberRegistry::new().with(Arc::new(SlowProber));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(PermissionId::Automation).is_some());
        assert!(registry.get(PermissionId::ScreenCapture).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_suppresses_within_window() {
        let debounce = TriggerDebounce::new(Duration::from_secs(5));
        assert!(debounce.try_fire());
        assert!(!debounce.try_fire());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(debounce.try_fire());
        debounce.reset();
        assert!(debounce.try_fire());
    }

    #[test]
    fn evidence_serializes_with_kind_tag() {
        let evidence = ProbeEvidence::new(
            PermissionId::MessagesAccess,
            EvidenceDetail::MessagesAccess {
                messages_access_ok: Some(true),
            },
        );
        let value = serde_json::to_value(&evidence).expect("serialize");
        assert_eq!(value["detail"]["kind"], "messages_access");
        assert_eq!(value["detail"]["messages_access_ok"], true);
    }
}
