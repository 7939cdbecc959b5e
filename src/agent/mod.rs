//! Agent module: the embodied agent that queries the vision model and
//! resolves its replies into environment actions.

pub mod agent;

pub use agent::{ContinuousDecision, DiscreteDecision, EmbodiedAgent, ModelReply};
