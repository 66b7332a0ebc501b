//! Leads — business contact records and contact normalization.

pub mod model;

pub use model::{Channel, ContactKind, Lead, email_domain, normalize_email, normalize_phone};
