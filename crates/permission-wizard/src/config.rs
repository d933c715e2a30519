//! Wizard configuration: the ordered step list and the restart policy.
//!
//! Loaded from JSON and validated once; nothing downstream re-checks these
//! bounds.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WizardError, WizardResult};
use crate::permission::PermissionId;
use crate::utils::time::secs_f64;

pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const MAX_RETRIES_LIMIT: u32 = 5;
pub const DEFAULT_PROBE_TIMEOUT_S: f64 = 5.0;
pub const DEFAULT_RESTART_COOLDOWN_S: f64 = 60.0;
/// Upper bound for any single timing field, one hour.
pub const MAX_TIMING_S: f64 = 3_600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Triggering raises the OS consent dialog directly.
    AutoDialog,
    /// The user has to flip the switch in system settings themselves.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub grace_s: f64,
    pub poll_s: f64,
    /// Hard cap on the whole step, measured from the trigger.
    pub deadline_s: f64,
}

impl StepTiming {
    pub fn grace(&self) -> Duration {
        secs_f64(self.grace_s)
    }

    pub fn poll_interval(&self) -> Duration {
        secs_f64(self.poll_s)
    }

    pub fn deadline(&self) -> Duration {
        secs_f64(self.deadline_s)
    }

    pub fn validate(&self, permission: PermissionId) -> WizardResult<()> {
        let fields = [
            ("grace_s", self.grace_s),
            ("poll_s", self.poll_s),
            ("deadline_s", self.deadline_s),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(WizardError::config(format!(
                    "{permission}: {name} must be finite"
                )));
            }
            if value > MAX_TIMING_S {
                return Err(WizardError::config(format!(
                    "{permission}: {name} exceeds {MAX_TIMING_S}s"
                )));
            }
        }
        if self.grace_s < 0.0 {
            return Err(WizardError::config(format!(
                "{permission}: grace_s must not be negative"
            )));
        }
        if self.poll_s <= 0.0 {
            return Err(WizardError::config(format!(
                "{permission}: poll_s must be positive"
            )));
        }
        if self.deadline_s <= self.grace_s {
            return Err(WizardError::config(format!(
                "{permission}: deadline_s must exceed grace_s"
            )));
        }
        if self.poll_s >= self.deadline_s - self.grace_s {
            return Err(WizardError::config(format!(
                "{permission}: poll_s must be shorter than the polling window"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub permission: PermissionId,
    pub mode: StepMode,
    pub timing: StepTiming,
    pub criticality: Criticality,
}

impl StepConfig {
    pub fn is_hard(&self) -> bool {
        self.criticality == Criticality::Hard
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Permissions whose grant only takes effect after a process restart.
    #[serde(default)]
    pub permissions: Vec<PermissionId>,
    #[serde(default = "default_restart_cooldown")]
    pub cooldown_s: f64,
}

impl RestartConfig {
    pub fn cooldown(&self) -> Duration {
        secs_f64(self.cooldown_s)
    }

    pub fn flags(&self, permission: PermissionId) -> bool {
        self.permissions.contains(&permission)
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            permissions: Vec::new(),
            cooldown_s: DEFAULT_RESTART_COOLDOWN_S,
        }
    }
}

fn default_restart_cooldown() -> f64 {
    DEFAULT_RESTART_COOLDOWN_S
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_probe_timeout() -> f64 {
    DEFAULT_PROBE_TIMEOUT_S
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardConfig {
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub restart: RestartConfig,
    /// Extra attempts granted to a hard step that ends undecided.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_s: f64,
}

impl WizardConfig {
    pub fn new(steps: Vec<StepConfig>) -> Self {
        Self {
            steps,
            restart: RestartConfig::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            probe_timeout_s: DEFAULT_PROBE_TIMEOUT_S,
        }
    }

    pub fn with_restart(mut self, restart: RestartConfig) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        secs_f64(self.probe_timeout_s)
    }

    pub fn from_json_str(data: &str) -> WizardResult<Self> {
        let config: WizardConfig = serde_json::from_str(data)
            .map_err(|error| WizardError::config(format!("failed to parse config: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> WizardResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|error| {
            WizardError::config(format!(
                "failed to read wizard config {}: {error}",
                path.display()
            ))
        })?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> WizardResult<()> {
        if self.steps.is_empty() {
            return Err(WizardError::config("no steps configured"));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.permission) {
                return Err(WizardError::config(format!(
                    "duplicate step for {}",
                    step.permission
                )));
            }
            step.timing.validate(step.permission)?;
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(WizardError::config(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        if !self.probe_timeout_s.is_finite()
            || self.probe_timeout_s <= 0.0
            || self.probe_timeout_s > MAX_TIMING_S
        {
            return Err(WizardError::config("probe_timeout_s out of range"));
        }
        if !self.restart.cooldown_s.is_finite()
            || self.restart.cooldown_s < 0.0
            || self.restart.cooldown_s > MAX_TIMING_S
        {
            return Err(WizardError::config("restart cooldown_s out of range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "steps": [
            {
                "permission": "input_monitoring",
                "mode": "auto_dialog",
                "timing": { "grace_s": 2.0, "poll_s": 0.5, "deadline_s": 30.0 },
                "criticality": "hard"
            },
            {
                "permission": "messages_access",
                "mode": "manual",
                "timing": { "grace_s": 0.0, "poll_s": 1.0, "deadline_s": 120.0 },
                "criticality": "soft"
            }
        ],
        "restart": { "permissions": ["input_monitoring"], "cooldown_s": 10.0 }
    }"#;

    fn timing(grace_s: f64, poll_s: f64, deadline_s: f64) -> StepTiming {
        StepTiming {
            grace_s,
            poll_s,
            deadline_s,
        }
    }

    #[test]
    fn parses_sample_with_defaults() {
        let config = WizardConfig::from_json_str(SAMPLE).expect("config");
        assert_eq!(config.steps.len(), 2);
        assert_eq!(config.steps[0].permission, PermissionId::InputMonitoring);
        assert_eq!(config.steps[1].mode, StepMode::Manual);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(config.restart.flags(PermissionId::InputMonitoring));
        assert!(!config.restart.flags(PermissionId::MessagesAccess));
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(SAMPLE.as_bytes()).expect("write");
        let config = WizardConfig::load(file.path()).expect("load");
        assert_eq!(config.restart.cooldown(), Duration::from_secs(10));
    }

    #[test]
    fn unknown_permission_rejected() {
        let data = SAMPLE.replace("messages_access", "camera");
        let err = WizardConfig::from_json_str(&data).expect_err("unknown permission");
        assert!(matches!(err, WizardError::Config(_)));
    }

    #[test]
    fn duplicate_permission_rejected() {
        let data = SAMPLE.replace("messages_access", "input_monitoring");
        let err = WizardConfig::from_json_str(&data).expect_err("duplicate");
        assert!(matches!(err, WizardError::Config(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn timing_bounds_enforced() {
        let permission = PermissionId::ScreenCapture;
        assert!(timing(1.0, 0.5, 10.0).validate(permission).is_ok());
        assert!(timing(1.0, 0.0, 10.0).validate(permission).is_err());
        assert!(timing(-1.0, 0.5, 10.0).validate(permission).is_err());
        assert!(timing(1.0, f64::INFINITY, 10.0).validate(permission).is_err());
        assert!(timing(10.0, 0.5, 10.0).validate(permission).is_err());
        assert!(timing(1.0, 9.0, 10.0).validate(permission).is_err());
        assert!(timing(1.0, 0.5, MAX_TIMING_S + 1.0).validate(permission).is_err());
    }

    #[test]
    fn empty_and_excess_retries_rejected() {
        assert!(WizardConfig::new(Vec::new()).validate().is_err());
        let config = WizardConfig::from_json_str(SAMPLE)
            .expect("config")
            .with_max_retries(MAX_RETRIES_LIMIT + 1);
        assert!(config.validate().is_err());
    }
}
