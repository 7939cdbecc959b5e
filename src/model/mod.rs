//! Model client abstractions for the vision-language policy.
//!
//! This module provides:
//! - [`api::VisionModel`] -- the seam the agent calls; fakes implement it in
//!   tests.
//! - [`api::VlmClient`] -- OpenAI-compatible chat completion client with
//!   image parts.
//! - [`prompt`] -- system and user prompt templates for each environment.
//! - [`scripted::ScriptedModel`] -- canned responses for mock runs and tests.

pub mod api;
pub mod prompt;
pub mod scripted;

pub use api::{ChatMessage, ChatResponse, ModelError, VisionModel, VlmClient};
pub use prompt::Prompt;
pub use scripted::ScriptedModel;
