//! Outreach Engine — compliant, rate-limited email and voice campaigns.

pub mod approval;
pub mod campaign;
pub mod compliance;
pub mod config;
pub mod content;
pub mod delivery;
pub mod error;
pub mod leads;
pub mod notify;
pub mod resilience;
pub mod store;
pub mod verification;
