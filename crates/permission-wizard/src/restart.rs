//! Restart escalation: decides which grants need a relaunch and hands the
//! relaunch to the process-lifecycle collaborator without restart storms.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::Instant;

use crate::classifier::Decision;
use crate::config::RestartConfig;
use crate::error::WizardResult;
use crate::permission::PermissionId;

/// The external process-lifecycle hook. `reason` is for logging only.
pub trait RestartHandoff: Send + Sync {
    fn schedule_restart(&self, reason: &str) -> WizardResult<()>;
}

pub type SharedRestartHandoff = Arc<dyn RestartHandoff>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDisposition {
    Scheduled,
    /// Every permission in the batch was already handed off.
    AlreadyScheduled,
    /// Inside the cooldown of the previous handoff.
    CoolingDown,
    EmptyBatch,
    /// The collaborator rejected the request; retried on the next launch.
    HandoffFailed,
}

pub struct RestartScheduler {
    config: RestartConfig,
    handoff: SharedRestartHandoff,
    last_scheduled: Option<Instant>,
    scheduled: BTreeSet<PermissionId>,
}

impl RestartScheduler {
    pub fn new(config: RestartConfig, handoff: SharedRestartHandoff) -> Self {
        Self {
            config,
            handoff,
            last_scheduled: None,
            scheduled: BTreeSet::new(),
        }
    }

    pub fn requires_restart(&self, permission: PermissionId, decision: Decision) -> bool {
        decision == Decision::Granted && self.config.flags(permission)
    }

    /// Hands one restart request to the collaborator for the whole batch.
    pub fn schedule_restart(
        &mut self,
        reason: &str,
        batch: &[PermissionId],
    ) -> WizardResult<RestartDisposition> {
        if batch.is_empty() {
            return Ok(RestartDisposition::EmptyBatch);
        }
        if batch.iter().all(|permission| self.scheduled.contains(permission)) {
            tracing::info!("restart already scheduled for {:?}", batch);
            return Ok(RestartDisposition::AlreadyScheduled);
        }
        if let Some(last) = self.last_scheduled {
            if last.elapsed() < self.config.cooldown() {
                tracing::warn!(
                    "restart for {:?} suppressed: within {:.1}s cooldown",
                    batch,
                    self.config.cooldown_s
                );
                return Ok(RestartDisposition::CoolingDown);
            }
        }

        self.handoff.schedule_restart(reason)?;
        self.last_scheduled = Some(Instant::now());
        self.scheduled.extend(batch.iter().copied());
        tracing::info!("restart scheduled ({reason})");
        Ok(RestartDisposition::Scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHandoff {
        calls: AtomicUsize,
    }

    impl RestartHandoff for CountingHandoff {
        fn schedule_restart(&self, _reason: &str) -> WizardResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scheduler(cooldown_s: f64) -> (RestartScheduler, Arc<CountingHandoff>) {
        let handoff = Arc::new(CountingHandoff::default());
        let config = RestartConfig {
            permissions: vec![PermissionId::InputMonitoring, PermissionId::ScreenCapture],
            cooldown_s,
        };
        (RestartScheduler::new(config, handoff.clone()), handoff)
    }

    #[test]
    fn only_flagged_grants_require_restart() {
        let (scheduler, _) = scheduler(0.0);
        assert!(scheduler.requires_restart(PermissionId::InputMonitoring, Decision::Granted));
        assert!(!scheduler.requires_restart(PermissionId::InputMonitoring, Decision::Denied));
        assert!(!scheduler.requires_restart(PermissionId::InputMonitoring, Decision::Unknown));
        assert!(!scheduler.requires_restart(PermissionId::Automation, Decision::Granted));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_schedules_once() {
        let (mut scheduler, handoff) = scheduler(30.0);
        let batch = [PermissionId::InputMonitoring, PermissionId::ScreenCapture];
        assert_eq!(
            scheduler.schedule_restart("grants", &batch).expect("schedule"),
            RestartDisposition::Scheduled
        );
        assert_eq!(
            scheduler.schedule_restart("grants", &batch).expect("schedule"),
            RestartDisposition::AlreadyScheduled
        );
        assert_eq!(
            scheduler
                .schedule_restart("grants", &[PermissionId::ScreenCapture])
                .expect("schedule"),
            RestartDisposition::AlreadyScheduled
        );
        assert_eq!(handoff.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_suppresses_new_batches() {
        let (mut scheduler, handoff) = scheduler(30.0);
        scheduler
            .schedule_restart("first", &[PermissionId::InputMonitoring])
            .expect("schedule");
        assert_eq!(
            scheduler
                .schedule_restart("second", &[PermissionId::ScreenCapture])
                .expect("schedule"),
            RestartDisposition::CoolingDown
        );
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(
            scheduler
                .schedule_restart("second", &[PermissionId::ScreenCapture])
                .expect("schedule"),
            RestartDisposition::Scheduled
        );
        assert_eq!(handoff.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_batch_is_noop() {
        let (mut scheduler, handoff) = scheduler(0.0);
        assert_eq!(
            scheduler.schedule_restart("none", &[]).expect("schedule"),
            RestartDisposition::EmptyBatch
        );
        assert_eq!(handoff.calls.load(Ordering::SeqCst), 0);
    }
}
