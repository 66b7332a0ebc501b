//! Human sign-off for generated outreach.

pub mod gate;
pub mod model;

pub use gate::ApprovalGate;
pub use model::{ApprovalEvent, ApprovalItem, ApprovalStats, ApprovalStatus, Decision};
