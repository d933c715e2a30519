pub mod bus;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod orchestrator;
pub mod permission;
pub mod phase;
pub mod probe;
pub mod restart;
pub mod utils;

pub use crate::classifier::{classify, get_classifier, Decision};
pub use crate::config::{Criticality, RestartConfig, StepConfig, StepMode, StepTiming, WizardConfig};
pub use crate::error::{WizardError, WizardResult};
pub use crate::event::{UIEvent, UIEventType};
pub use crate::ledger::{FileLedger, LedgerRecord, LedgerStore, MemoryLedger};
pub use crate::orchestrator::{PermissionOrchestrator, WizardOutcome, WizardSnapshot};
pub use crate::permission::PermissionId;
pub use crate::phase::Phase;
pub use crate::probe::{ProbeEvidence, ProbeLevel, ProbeResult, Prober, ProberRegistry};
pub use crate::restart::{RestartDisposition, RestartHandoff};
