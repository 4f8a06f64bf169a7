//! LLM enrichment: cache, gatekeeper, prompt sanitizer, client, validator,
//! and static fallbacks.

pub mod cache;
pub mod client;
pub mod fallbacks;
pub mod gatekeeper;
pub mod models;
pub mod prompt;
pub mod validator;

pub use cache::ExplanationCache;
pub use client::{LlmClient, LlmStats};
pub use fallbacks::get_fallback;
pub use gatekeeper::{GateReason, LlmGatekeeper};
pub use models::{AttackPhase, LlmConfidence, LlmExplanation};
