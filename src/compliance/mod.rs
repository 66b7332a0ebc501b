//! Consent and accountability: the opt-out registry and the audit log.

pub mod audit;
pub mod opt_out;

pub use audit::{AuditEntry, AuditLevel, AuditLogger};
pub use opt_out::{OptOutMethod, OptOutRecord, OptOutRegistry, contains_opt_out_keyword};
