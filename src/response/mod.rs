//! Response parsing and action resolution.
//!
//! Everything here is a pure function of the model's text: no I/O, no state,
//! and no error ever reaches the caller. Malformed output degrades to a weaker
//! signal and finally to [`Resolution::Unresolved`] or an empty plan.
//!
//! - [`parse`] -- split raw output into reasoning / answer / action fragment.
//! - [`json`] -- find and repair JSON embedded in prose.
//! - [`resolve`] -- discrete action ids and continuous control vectors.

pub mod json;
pub mod parse;
pub mod resolve;

pub use parse::{parse_structure, ParsedResponse};
pub use resolve::{
    resolve_continuous_actions, resolve_discrete_actions, ActionBounds, ContinuousAction,
    Resolution, UNRESOLVED_SENTINEL,
};

/// Why a JSON plan could not be used. Only ever logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("JSON is neither an executable_plan object nor a step array")]
    NotAPlan,

    #[error("plan step {index} is not an object")]
    StepNotObject { index: usize },

    #[error("plan step {index} has a non-array action")]
    ActionNotArray { index: usize },

    #[error("plan step {index} has {found} components, need {dimension}")]
    TooFewComponents {
        index: usize,
        found: usize,
        dimension: usize,
    },

    #[error("plan step {index} component {axis} is not numeric")]
    NonNumeric { index: usize, axis: usize },

    #[error("action bounds cover {bounds} dimensions, need {dimension}")]
    BoundsMismatch { dimension: usize, bounds: usize },
}
