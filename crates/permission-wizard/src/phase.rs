use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    FirstRun,
    Probing,
    AwaitingGrant,
    RestartPending,
    Completed,
    LimitedMode,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FirstRun => "FIRST_RUN",
            Phase::Probing => "PROBING",
            Phase::AwaitingGrant => "AWAITING_GRANT",
            Phase::RestartPending => "RESTART_PENDING",
            Phase::Completed => "COMPLETED",
            Phase::LimitedMode => "LIMITED_MODE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::LimitedMode)
    }

    /// Legal transitions of the wizard. Leaving a terminal phase goes through
    /// [`Phase::FirstRun`] only, via an explicit re-trigger.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        if *self == next {
            return true;
        }
        match (self, next) {
            (FirstRun, Probing) => true,
            (Probing, AwaitingGrant) => true,
            (AwaitingGrant, Probing) => true,
            (Probing | AwaitingGrant, RestartPending) => true,
            (Probing | AwaitingGrant | RestartPending, Completed | LimitedMode) => true,
            // Resumed after relaunch, or the process died mid-wizard.
            (RestartPending, Probing) => true,
            (FirstRun, Completed | LimitedMode | RestartPending) => true,
            (Completed | LimitedMode, FirstRun) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Phase::FirstRun,
            Phase::Probing,
            Phase::AwaitingGrant,
            Phase::Probing,
            Phase::AwaitingGrant,
            Phase::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn terminal_phases_only_reset_to_first_run() {
        for terminal in [Phase::Completed, Phase::LimitedMode] {
            assert!(terminal.is_terminal());
            assert!(terminal.can_transition_to(Phase::FirstRun));
            assert!(!terminal.can_transition_to(Phase::Probing));
            assert!(!terminal.can_transition_to(Phase::RestartPending));
        }
        assert!(!Phase::Completed.can_transition_to(Phase::LimitedMode));
    }

    #[test]
    fn restart_pending_resumes_into_probing() {
        assert!(Phase::AwaitingGrant.can_transition_to(Phase::RestartPending));
        assert!(Phase::RestartPending.can_transition_to(Phase::Probing));
        assert!(!Phase::RestartPending.can_transition_to(Phase::AwaitingGrant));
    }

    #[test]
    fn serializes_screaming_snake() {
        let value = serde_json::to_value(Phase::RestartPending).expect("serialize");
        assert_eq!(value, serde_json::json!("RESTART_PENDING"));
    }
}
