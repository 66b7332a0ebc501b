//! Campaigns — eligibility policy, run orchestration, scheduling, and reports.

pub mod attempt;
pub mod orchestrator;
pub mod policy;
pub mod report;
pub mod scheduler;
pub mod state;

pub use attempt::{AttemptCorrection, AttemptStatus, OutreachAttempt};
pub use orchestrator::{CampaignServices, LeadOutcome, Orchestrator};
pub use policy::{CallWindow, Eligibility, IneligibleReason, PolicyInput, is_eligible, prioritize};
pub use report::{CampaignPhase, CampaignReport};
pub use scheduler::{CampaignScheduler, spawn_campaign_ticker};
pub use state::{EngineState, HaltSwitch, RateState, RunGuard, RunRegistry};
