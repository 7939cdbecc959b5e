//! Core environment traits and shared types.
//!
//! Every simulator (EB-ALFRED, EB-Habitat, EB-Navigation, EB-Manipulation) is
//! reached through the [`Environment`] trait so the episode driver can run
//! them uniformly. A fresh instance is obtained per episode from an
//! [`EnvLauncher`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::frame::Frame;
use super::EnvKind;
use crate::response::ActionBounds;

/// Observation keys checked, in order, for the frame shown to the model.
pub const PREFERRED_FRAME_KEYS: [&str; 5] =
    ["head_rgb", "rgb", "image", "front_rgb", "left_shoulder_rgb"];

/// Substrings that mark an observation key as image-like.
const IMAGE_KEY_HINTS: [&str; 4] = ["rgb", "image", "frame", "pixel"];

/// An observation returned by the environment after a reset or step.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Camera images keyed by sensor name (e.g. `head_rgb`).
    pub images: BTreeMap<String, Frame>,
    /// Every non-image observation field, passed through untouched.
    pub fields: Map<String, Value>,
}

impl Observation {
    /// The frame to show the model and append to the episode video.
    ///
    /// Preferred keys first, then any key that looks like an image, then the
    /// first image available.
    pub fn primary_frame(&self) -> Option<&Frame> {
        PREFERRED_FRAME_KEYS
            .iter()
            .find_map(|key| self.images.get(*key))
            .or_else(|| {
                self.images.iter().find_map(|(key, frame)| {
                    let key = key.to_lowercase();
                    IMAGE_KEY_HINTS
                        .iter()
                        .any(|hint| key.contains(hint))
                        .then_some(frame)
                })
            })
            .or_else(|| self.images.values().next())
    }

    /// Object positions reported by the manipulation simulator, if any.
    pub fn object_info(&self) -> Option<String> {
        self.fields.get("object_informations").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// The action space of the current episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpace {
    /// Ordered action descriptions; the index is the action id.
    Discrete { skill_set: Vec<String> },
    /// Box bounds of a control vector.
    Continuous { bounds: ActionBounds },
}

impl ActionSpace {
    /// Highest valid action id, `-1` for an empty or continuous space.
    pub fn max_action_id(&self) -> i64 {
        match self {
            Self::Discrete { skill_set } => skill_set.len() as i64 - 1,
            Self::Continuous { .. } => -1,
        }
    }
}

/// An action handed to [`Environment::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvAction<'a> {
    Discrete(usize),
    Continuous(&'a [f64]),
}

/// Extra context forwarded with each step. Navigation consumes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepContext<'a> {
    /// The model's reasoning for the current decision.
    pub reasoning: &'a str,
    /// Zero-based decision index within the episode.
    pub turn: usize,
}

/// Result of one environment transition.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: Map<String, Value>,
}

impl StepOutcome {
    /// The `env_feedback` string reported by the simulator, empty if absent.
    pub fn env_feedback(&self) -> String {
        match self.info.get("env_feedback") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// Failures an environment reports to the episode driver.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// The requested episode index is past the end of the dataset.
    #[error("episode {index} is not in the {kind} dataset")]
    EpisodeOutOfRange { kind: EnvKind, index: usize },

    #[error("simulator request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("simulator returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("invalid observation: {0}")]
    Observation(String),

    #[error("cannot step a finished episode")]
    EpisodeFinished,

    #[error("action does not match the {0} action space")]
    ActionMismatch(EnvKind),
}

/// The core environment trait.
#[allow(async_fn_in_trait)]
pub trait Environment: Send {
    /// Start the loaded episode and return the initial observation.
    async fn reset(&mut self) -> Result<Observation, EnvError>;

    /// Execute one action.
    async fn step(
        &mut self,
        action: EnvAction<'_>,
        context: &StepContext<'_>,
    ) -> Result<StepOutcome, EnvError>;

    /// Release simulator resources.
    async fn close(&mut self) -> Result<(), EnvError>;

    /// Natural-language goal of the current episode.
    fn instruction(&self) -> &str;

    /// Discrete skill set or continuous bounds of the current episode.
    fn action_space(&self) -> &ActionSpace;
}

/// Builds one environment instance per episode.
#[allow(async_fn_in_trait)]
pub trait EnvLauncher {
    type Env: Environment;

    /// Load episode `index` of the `kind` benchmark.
    async fn launch(&self, kind: EnvKind, index: usize) -> Result<Self::Env, EnvError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::frame::tests::tiny_png;

    fn frame() -> Frame {
        Frame::from_png(tiny_png()).unwrap()
    }

    #[test]
    fn preferred_key_wins() {
        let mut obs = Observation::default();
        obs.images.insert("depth".into(), frame());
        obs.images.insert("wrist_image".into(), frame());
        obs.images.insert("rgb".into(), frame());
        let picked = obs.primary_frame().unwrap() as *const Frame;
        assert_eq!(picked, &obs.images["rgb"] as *const Frame);
    }

    #[test]
    fn image_like_key_beats_first_key() {
        let mut obs = Observation::default();
        obs.images.insert("Depth".into(), frame());
        obs.images.insert("Wrist_Image".into(), frame());
        let picked = obs.primary_frame().unwrap() as *const Frame;
        assert_eq!(picked, &obs.images["Wrist_Image"] as *const Frame);
    }

    #[test]
    fn falls_back_to_any_image() {
        let mut obs = Observation::default();
        assert!(obs.primary_frame().is_none());
        obs.images.insert("depth".into(), frame());
        assert!(obs.primary_frame().is_some());
    }

    #[test]
    fn object_info_passes_strings_through() {
        let mut obs = Observation::default();
        assert_eq!(obs.object_info(), None);
        obs.fields
            .insert("object_informations".into(), Value::String("cube at [1,2,3]".into()));
        assert_eq!(obs.object_info().as_deref(), Some("cube at [1,2,3]"));
    }

    #[test]
    fn max_action_id_of_spaces() {
        let space = ActionSpace::Discrete {
            skill_set: vec!["a".into(), "b".into()],
        };
        assert_eq!(space.max_action_id(), 1);
        let empty = ActionSpace::Discrete { skill_set: vec![] };
        assert_eq!(empty.max_action_id(), -1);
    }

    #[test]
    fn env_feedback_reads_info() {
        let mut outcome = StepOutcome::default();
        assert_eq!(outcome.env_feedback(), "");
        outcome
            .info
            .insert("env_feedback".into(), Value::String("Last action succeeded".into()));
        assert_eq!(outcome.env_feedback(), "Last action succeeded");
    }
}
