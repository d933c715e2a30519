use serde_json::json;
use tokio::time::Instant;

use super::{PermissionOrchestrator, PermissionState, PlannedStep, StepOutcome};
use crate::classifier::{get_classifier, Decision};
use crate::event::{UIEvent, UIEventType};
use crate::ledger::LedgerRecord;
use crate::phase::Phase;
use crate::probe::{bounded_probe, ProbeLevel, ProbeResult};

impl PermissionOrchestrator {
    /// Trigger, grace, poll, resolve. Never fails: prober errors become
    /// unknown evidence and ledger errors ride along in the outcome.
    pub(super) async fn execute_step(&mut self, planned: &PlannedStep) -> StepOutcome {
        let step = &planned.config;
        let permission = step.permission;
        let attempt = {
            let state = self
                .working
                .entry(permission)
                .or_insert_with(|| PermissionState::new(step.criticality));
            state.attempts += 1;
            state.run_attempts += 1;
            state.attempts
        };

        self.transition(Phase::Probing).await;
        self.bus.emit(UIEvent::for_permission(
            UIEventType::PermissionRequested,
            permission,
            json!({
                "label": permission.label(),
                "mode": step.mode,
                "criticality": step.criticality,
                "attempt": attempt,
            }),
        ));

        let triggered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = planned.prober.trigger(step) => Some(result),
        };
        let decision = match triggered {
            None => return self.cancel_step(planned, attempt).await,
            Some(Err(error)) if !step.is_hard() => {
                tracing::warn!("trigger for soft {} failed, skipping: {}", permission, error);
                let mut outcome = StepOutcome::new(permission, Decision::Unknown, attempt);
                outcome.skipped = true;
                self.bus.emit(UIEvent::for_permission(
                    UIEventType::PermissionResolved,
                    permission,
                    json!({
                        "decision": Decision::Unknown,
                        "attempt": attempt,
                        "skipped": true,
                    }),
                ));
                return outcome;
            }
            Some(Err(error)) => {
                tracing::warn!("trigger for {} failed: {}", permission, error);
                Decision::Unknown
            }
            Some(Ok(())) => match self.await_decision(planned).await {
                Some(decision) => decision,
                None => return self.cancel_step(planned, attempt).await,
            },
        };

        self.resolve(planned, decision, attempt).await
    }

    /// Grace period, then heavy probes every `poll_s` until a settled
    /// decision or the deadline. `None` means cancelled.
    async fn await_decision(&mut self, planned: &PlannedStep) -> Option<Decision> {
        let step = &planned.config;
        let triggered_at = Instant::now();
        let deadline = triggered_at + step.timing.deadline();
        self.transition(Phase::AwaitingGrant).await;

        if !self.wait_until(triggered_at + step.timing.grace()).await {
            return None;
        }

        let classifier = get_classifier(step.permission);
        loop {
            let result = self.cancellable_probe(planned, ProbeLevel::Heavy).await?;
            let decision = classifier(&result.evidence);
            if decision.is_settled() {
                return Some(decision);
            }

            if !self.pending_writes.is_empty() {
                if let Err(error) = self.flush_pending_writes().await {
                    tracing::debug!(
                        "ledger still behind while polling {}: {}",
                        step.permission,
                        error
                    );
                }
            }
            let next_poll = Instant::now() + step.timing.poll_interval();
            if next_poll > deadline {
                tracing::debug!("{} undecided at deadline", step.permission);
                return Some(Decision::Unknown);
            }
            if !self.wait_until(next_poll).await {
                return None;
            }
        }
    }

    async fn resolve(
        &mut self,
        planned: &PlannedStep,
        decision: Decision,
        attempt: u32,
    ) -> StepOutcome {
        let step = &planned.config;
        let permission = step.permission;
        let restart_required = self.restart.requires_restart(permission, decision)
            && !self.restarted.contains(&permission);

        let run_attempts = match self.working.get_mut(&permission) {
            Some(state) => {
                state.decision = decision;
                state.restart_required = restart_required;
                state.run_attempts
            }
            None => attempt,
        };

        let record = LedgerRecord::new(permission, decision)
            .with_restart_required(restart_required)
            .with_attempts(attempt);
        let persist_error = self.persist(record).await.err();

        tracing::info!(
            "{} resolved {} on attempt {}{}",
            permission,
            decision,
            attempt,
            if restart_required { " (restart required)" } else { "" }
        );
        self.bus.emit(UIEvent::for_permission(
            UIEventType::PermissionResolved,
            permission,
            json!({
                "decision": decision,
                "attempt": attempt,
                "restart_required": restart_required,
            }),
        ));

        if restart_required && !self.restart_batch.contains(&permission) {
            self.restart_batch.push(permission);
        }

        let mut outcome = StepOutcome::new(permission, decision, attempt);
        outcome.restart_required = restart_required;
        outcome.requeue =
            decision == Decision::Unknown && step.is_hard() && run_attempts <= self.max_retries;
        outcome.persist_error = persist_error;
        outcome
    }

    /// Records `unknown` for the interrupted permission and stops there.
    async fn cancel_step(&mut self, planned: &PlannedStep, attempt: u32) -> StepOutcome {
        let permission = planned.config.permission;
        if let Some(state) = self.working.get_mut(&permission) {
            state.decision = Decision::Unknown;
            state.restart_required = false;
        }
        let record = LedgerRecord::new(permission, Decision::Unknown).with_attempts(attempt);
        let mut outcome = StepOutcome::new(permission, Decision::Unknown, attempt);
        outcome.cancelled = true;
        outcome.persist_error = self.persist(record).await.err();
        outcome
    }

    /// Heavy or light probe raced against cancellation and the probe timeout.
    /// Failures come back as missing evidence; `None` means cancelled.
    pub(super) async fn cancellable_probe(
        &self,
        planned: &PlannedStep,
        level: ProbeLevel,
    ) -> Option<ProbeResult> {
        let step = &planned.config;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            result = bounded_probe(planned.prober.as_ref(), level, step, self.probe_timeout) => result,
        };
        Some(match result {
            Ok(result) => result,
            Err(error) => {
                if error.is_recoverable() {
                    tracing::debug!("{:?} probe for {} failed: {}", level, step.permission, error);
                } else {
                    tracing::warn!("{:?} probe for {} errored: {}", level, step.permission, error);
                }
                ProbeResult::unavailable(step.permission, level, &error)
            }
        })
    }

    /// Sleeps until `at`. Returns false if cancelled first.
    async fn wait_until(&self, at: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(at) => true,
        }
    }
}
