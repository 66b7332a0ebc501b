//! Retry with exponential backoff and per-provider circuit breaking.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot, BreakerState};
pub use retry::RetryPolicy;
