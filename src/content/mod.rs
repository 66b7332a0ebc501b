//! Outreach content: generation, validation, compliance stamping.

pub mod compliance;
pub mod generator;
pub mod message;
pub mod pipeline;
pub mod template;
pub mod validate;

pub use generator::{AiBackend, AiConfig, AiGenerator, RigGenerator, create_generator};
pub use message::{GenerationMethod, Message, UnsubscribeToken, content_fingerprint};
pub use pipeline::ContentPipeline;
