//! Permission-acquisition wizard.
//!
//! The orchestrator owns the wizard [`Phase`] and the per-permission working
//! state. It walks the configured steps one at a time, persists every
//! resolution to the ledger, and ends in `COMPLETED`, `LIMITED_MODE`, or
//! parked in `RESTART_PENDING` until the next launch.

mod step;
mod types;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;
use crate::classifier::{get_classifier, Decision};
use crate::config::{Criticality, StepConfig, WizardConfig};
use crate::error::{WizardError, WizardResult};
use crate::event::{UIEvent, UIEventType};
use crate::ledger::{LedgerRecord, SharedLedger};
use crate::permission::PermissionId;
use crate::phase::Phase;
use crate::probe::{ProbeLevel, ProberRegistry, SharedProber};
use crate::restart::{RestartDisposition, RestartScheduler, SharedRestartHandoff};

pub use types::{PermissionState, StepOutcome, WizardOutcome, WizardSnapshot};

#[derive(Clone)]
struct PlannedStep {
    config: StepConfig,
    prober: SharedProber,
}

pub struct PermissionOrchestrator {
    plan: Vec<PlannedStep>,
    ledger: SharedLedger,
    restart: RestartScheduler,
    bus: Bus,
    cancel: CancellationToken,
    max_retries: u32,
    probe_timeout: Duration,
    phase: Phase,
    working: BTreeMap<PermissionId, PermissionState>,
    /// Records whose ledger write failed; retried on the next resolution.
    pending_writes: BTreeMap<PermissionId, LedgerRecord>,
    restart_batch: Vec<PermissionId>,
    /// Permissions whose restart already happened before this launch.
    restarted: BTreeSet<PermissionId>,
}

impl PermissionOrchestrator {
    /// Validates the configuration and binds every step to its prober.
    pub fn new(
        config: WizardConfig,
        probers: &ProberRegistry,
        ledger: SharedLedger,
        handoff: SharedRestartHandoff,
        bus: Bus,
    ) -> WizardResult<Self> {
        config.validate()?;

        let mut plan = Vec::with_capacity(config.steps.len());
        let mut working = BTreeMap::new();
        for step in &config.steps {
            let prober = probers.get(step.permission).ok_or_else(|| {
                WizardError::config(format!("no prober registered for {}", step.permission))
            })?;
            working.insert(step.permission, PermissionState::new(step.criticality));
            plan.push(PlannedStep {
                config: step.clone(),
                prober,
            });
        }

        Ok(Self {
            plan,
            ledger,
            restart: RestartScheduler::new(config.restart.clone(), handoff),
            bus,
            cancel: CancellationToken::new(),
            max_retries: config.max_retries,
            probe_timeout: config.probe_timeout(),
            phase: Phase::FirstRun,
            working,
            pending_writes: BTreeMap::new(),
            restart_batch: Vec::new(),
            restarted: BTreeSet::new(),
        })
    }

    /// Replaces the cancellation token, e.g. with a child of an app-wide one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        WizardSnapshot {
            phase: self.phase,
            permissions: self.working.clone(),
            unpersisted: self.pending_writes.keys().copied().collect(),
        }
    }

    /// Runs the wizard from whatever phase the ledger holds.
    ///
    /// A terminal phase is reported as-is; use [`Self::retrigger`] to walk
    /// the steps again. Any other non-initial phase means an earlier launch
    /// was interrupted: permissions already denied or restricted are not
    /// asked for again until the wizard is re-triggered.
    pub async fn run(&mut self) -> WizardResult<WizardOutcome> {
        let stored = self.ledger.get_wizard_phase().await?;
        self.hydrate().await?;
        self.phase = stored;
        tracing::info!("permission wizard starting from {}", stored);

        if stored.is_terminal() {
            return Ok(self.outcome(false, None));
        }
        let resuming = stored != Phase::FirstRun;

        // Every launch after a restart-requiring grant is a restart, whatever
        // phase the ledger was left in.
        if self.working.values().any(|state| state.restart_required) {
            self.resume_after_restart().await;
            if self.cancel.is_cancelled() {
                return Ok(self.finish_cancelled(None).await);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.plan.len()).collect();
        while let Some(index) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                return Ok(self.finish_cancelled(None).await);
            }
            let planned = self.plan[index].clone();
            let permission = planned.config.permission;
            if resuming && self.is_settled_refusal(permission) {
                tracing::debug!(
                    "{} already {}, not asking again",
                    permission,
                    self.state(permission).decision
                );
                continue;
            }
            if self.confirm_existing_grant(&planned).await {
                tracing::debug!("{} already granted, skipping", permission);
                continue;
            }

            let mut outcome = self.execute_step(&planned).await;
            if let Some(error) = outcome.persist_error.take() {
                tracing::warn!("step {} not persisted yet: {}", outcome.permission, error);
            }
            if outcome.cancelled {
                return Ok(self.finish_cancelled(Some(outcome.permission)).await);
            }
            if outcome.requeue {
                tracing::info!(
                    "{} still undecided after attempt {}, requeueing",
                    outcome.permission,
                    outcome.attempt
                );
                queue.push_back(index);
            }
        }

        if let Err(error) = self.flush_pending_writes().await {
            tracing::warn!("ledger still behind at end of run: {}", error);
        }
        if !self.restart_batch.is_empty() {
            let disposition = self.park_for_restart().await;
            return Ok(self.outcome(false, Some(disposition)));
        }
        self.finish_terminal().await;
        Ok(self.outcome(false, None))
    }

    /// Runs a single step outside the normal sequence.
    ///
    /// The resolution is kept in the working state even when its ledger write
    /// fails; the write is retried on the next resolution attempt.
    pub async fn run_step(&mut self, step: &StepConfig) -> WizardResult<StepOutcome> {
        let prober = self
            .plan
            .iter()
            .find(|planned| planned.config.permission == step.permission)
            .map(|planned| planned.prober.clone())
            .ok_or_else(|| {
                WizardError::config(format!("{} is not part of the wizard", step.permission))
            })?;
        step.timing.validate(step.permission)?;

        let planned = PlannedStep {
            config: step.clone(),
            prober,
        };
        let mut outcome = self.execute_step(&planned).await;
        match outcome.persist_error.take() {
            Some(error) => Err(error),
            None => Ok(outcome),
        }
    }

    /// Re-opens a finished wizard. Existing grants are re-confirmed rather
    /// than re-requested on the next [`Self::run`].
    pub async fn retrigger(&mut self) -> WizardResult<()> {
        let stored = self.ledger.get_wizard_phase().await?;
        if !stored.is_terminal() {
            tracing::info!("retrigger ignored: wizard still in {}", stored);
            return Ok(());
        }
        self.ledger.set_wizard_phase(Phase::FirstRun).await?;
        self.phase = Phase::FirstRun;
        self.restart_batch.clear();
        for state in self.working.values_mut() {
            state.run_attempts = 0;
        }
        tracing::info!("permission wizard re-triggered from {}", stored);
        Ok(())
    }

    async fn hydrate(&mut self) -> WizardResult<()> {
        for planned in &self.plan {
            let permission = planned.config.permission;
            let Some(record) = self.ledger.get(permission).await? else {
                continue;
            };
            if let Some(state) = self.working.get_mut(&permission) {
                state.decision = record.decision;
                state.restart_required = record.restart_required;
                state.attempts = record.attempts;
            }
        }
        Ok(())
    }

    /// After a relaunch, re-checks every grant that was waiting on the restart.
    /// The phase only leaves `RESTART_PENDING` once every re-check is recorded.
    async fn resume_after_restart(&mut self) {
        let waiting: Vec<PlannedStep> = self
            .plan
            .iter()
            .filter(|planned| {
                self.working
                    .get(&planned.config.permission)
                    .is_some_and(|state| state.restart_required)
            })
            .cloned()
            .collect();

        for planned in waiting {
            let permission = planned.config.permission;
            let Some(result) = self
                .cancellable_probe(&planned, ProbeLevel::Heavy)
                .await
            else {
                return;
            };
            let decision = get_classifier(permission)(&result.evidence);
            self.restarted.insert(permission);

            let attempts = self.state(permission).attempts;
            if let Some(state) = self.working.get_mut(&permission) {
                state.decision = decision;
                state.restart_required = false;
            }
            let record = LedgerRecord::new(permission, decision).with_attempts(attempts);
            if let Err(error) = self.persist(record).await {
                tracing::warn!("resume of {} not persisted yet: {}", permission, error);
            }
            tracing::info!("{} after restart: {}", permission, decision);
            self.bus.emit(UIEvent::for_permission(
                UIEventType::PermissionResolved,
                permission,
                json!({
                    "decision": decision,
                    "attempt": attempts,
                    "restart_required": false,
                    "resumed": true,
                }),
            ));
        }
        self.transition(Phase::Probing).await;
    }

    fn is_settled_refusal(&self, permission: PermissionId) -> bool {
        matches!(
            self.state(permission).decision,
            Decision::Denied | Decision::Restricted
        )
    }

    /// True when the ledger already holds an effective grant that a fresh
    /// probe still agrees with. Nothing is written on this path.
    async fn confirm_existing_grant(&mut self, planned: &PlannedStep) -> bool {
        let permission = planned.config.permission;
        if !self.state(permission).is_effective_grant() {
            return false;
        }
        let classifier = get_classifier(permission);
        for level in [ProbeLevel::Light, ProbeLevel::Heavy] {
            let Some(result) = self.cancellable_probe(planned, level).await else {
                return false;
            };
            match classifier(&result.evidence) {
                Decision::Granted => return true,
                Decision::Unknown => continue,
                other => {
                    tracing::info!("{} was granted but now reads {}", permission, other);
                    return false;
                }
            }
        }
        false
    }

    async fn park_for_restart(&mut self) -> RestartDisposition {
        self.transition(Phase::RestartPending).await;
        let batch = std::mem::take(&mut self.restart_batch);
        self.bus.emit(UIEvent::wizard(
            UIEventType::RestartRequired,
            json!({ "permissions": batch }),
        ));

        let reason = format!(
            "permission grants need a restart: {}",
            batch
                .iter()
                .map(|permission| permission.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        match self.restart.schedule_restart(&reason, &batch) {
            Ok(disposition) => disposition,
            Err(error) => {
                tracing::warn!("restart handoff failed: {}", error);
                RestartDisposition::HandoffFailed
            }
        }
    }

    async fn finish_terminal(&mut self) {
        let blockers = self.hard_blockers();
        let (phase, event_type) = if blockers.is_empty() {
            (Phase::Completed, UIEventType::WizardCompleted)
        } else {
            (Phase::LimitedMode, UIEventType::WizardLimited)
        };
        self.transition(phase).await;
        self.bus.emit(UIEvent::wizard(
            event_type,
            json!({
                "blockers": blockers,
                "decisions": self.decisions(),
            }),
        ));
    }

    async fn finish_cancelled(&mut self, permission: Option<PermissionId>) -> WizardOutcome {
        if let Err(error) = self.flush_pending_writes().await {
            tracing::warn!("ledger still behind at cancellation: {}", error);
        }
        tracing::info!("permission wizard cancelled in {}", self.phase);
        self.bus.emit(UIEvent::new(
            UIEventType::WizardCancelled,
            permission,
            json!({ "phase": self.phase }),
        ));
        self.outcome(true, None)
    }

    /// Hard permissions that keep the wizard out of `COMPLETED`. A grant
    /// that never reached the ledger counts as a blocker.
    fn hard_blockers(&self) -> Vec<PermissionId> {
        self.plan
            .iter()
            .filter(|planned| planned.config.is_hard())
            .map(|planned| planned.config.permission)
            .filter(|permission| {
                !self.state(*permission).is_effective_grant()
                    || self.pending_writes.contains_key(permission)
            })
            .collect()
    }

    fn decisions(&self) -> BTreeMap<PermissionId, Decision> {
        self.working
            .iter()
            .map(|(permission, state)| (*permission, state.decision))
            .collect()
    }

    fn outcome(&self, cancelled: bool, restart: Option<RestartDisposition>) -> WizardOutcome {
        WizardOutcome {
            phase: self.phase,
            decisions: self.decisions(),
            cancelled,
            restart,
        }
    }

    fn state(&self, permission: PermissionId) -> PermissionState {
        self.working
            .get(&permission)
            .cloned()
            .unwrap_or_else(|| PermissionState::new(Criticality::Soft))
    }

    async fn transition(&mut self, next: Phase) {
        if self.phase == next {
            return;
        }
        if !self.phase.can_transition_to(next) {
            tracing::error!("illegal phase transition {} -> {}", self.phase, next);
            return;
        }
        tracing::debug!("phase {} -> {}", self.phase, next);
        self.phase = next;
        if let Err(error) = self.ledger.set_wizard_phase(next).await {
            tracing::warn!("failed to persist phase {}: {}", next, error);
        }
    }

    /// Writes the record, first retrying anything that failed earlier.
    async fn persist(&mut self, record: LedgerRecord) -> WizardResult<()> {
        self.pending_writes.insert(record.permission, record);
        self.flush_pending_writes().await
    }

    async fn flush_pending_writes(&mut self) -> WizardResult<()> {
        let mut first_error = None;
        let pending: Vec<LedgerRecord> = self.pending_writes.values().cloned().collect();
        for record in pending {
            match self.ledger.put(record.permission, &record).await {
                Ok(()) => {
                    self.pending_writes.remove(&record.permission);
                }
                Err(error) => {
                    tracing::warn!("ledger write for {} failed: {}", record.permission, error);
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
