//! Scripted environments for offline runs and tests.
//!
//! A [`MockLauncher`] holds a short list of canned episodes per benchmark and
//! replays them regardless of which action the agent picks. Every observation
//! carries a 1x1 PNG so the frame, log, and video paths are exercised exactly
//! as with a real simulator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use base64::Engine;
use serde_json::{json, Map, Value};

use super::frame::Frame;
use super::traits::{
    ActionSpace, EnvAction, EnvError, EnvLauncher, Environment, Observation, StepContext,
    StepOutcome,
};
use super::EnvKind;
use crate::response::ActionBounds;

const BLANK_FRAME_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// A single canned episode.
#[derive(Debug, Clone)]
pub struct MockEpisode {
    pub instruction: String,
    pub action_space: ActionSpace,
    /// Outcomes returned by successive `step` calls. Stepping past the end
    /// ends the episode with zero reward.
    pub steps: Vec<MockStep>,
}

#[derive(Debug, Clone)]
pub struct MockStep {
    pub reward: f64,
    pub done: bool,
    pub feedback: String,
}

impl MockStep {
    pub fn new(feedback: impl Into<String>, reward: f64, done: bool) -> Self {
        Self {
            reward,
            done,
            feedback: feedback.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Hands out [`MockEnv`] instances from per-kind episode lists.
///
/// Indices past the end of a list report [`EnvError::EpisodeOutOfRange`].
/// Every executed action is appended to a shared journal so tests can check
/// what actually reached the environment.
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    episodes: HashMap<EnvKind, Vec<MockEpisode>>,
    broken: HashSet<(EnvKind, usize)>,
    journal: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Vec<(EnvKind, usize)>>>,
}

impl MockLauncher {
    /// A launcher pre-loaded with two episodes for each benchmark.
    pub fn new() -> Self {
        let mut launcher = Self::default();
        for kind in EnvKind::ALL {
            launcher = launcher.with_episodes(kind, default_episodes(kind));
        }
        launcher
    }

    /// Replace the episode list of one benchmark.
    pub fn with_episodes(mut self, kind: EnvKind, episodes: Vec<MockEpisode>) -> Self {
        self.episodes.insert(kind, episodes);
        self
    }

    /// Make launching one episode fail with a server error.
    pub fn with_broken_episode(mut self, kind: EnvKind, index: usize) -> Self {
        self.broken.insert((kind, index));
        self
    }

    /// Every action executed so far, as `"<kind>#<episode>:<action>"`.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Every `(kind, episode)` whose environment has been closed.
    pub fn closed_sessions(&self) -> Vec<(EnvKind, usize)> {
        self.closed.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl EnvLauncher for MockLauncher {
    type Env = MockEnv;

    async fn launch(&self, kind: EnvKind, index: usize) -> Result<MockEnv, EnvError> {
        if self.broken.contains(&(kind, index)) {
            return Err(EnvError::Server {
                status: 500,
                body: format!("scene {index} failed to load"),
            });
        }
        let episode = self
            .episodes
            .get(&kind)
            .and_then(|episodes| episodes.get(index))
            .cloned()
            .ok_or(EnvError::EpisodeOutOfRange { kind, index })?;

        Ok(MockEnv {
            kind,
            index,
            episode,
            step_index: 0,
            done: false,
            journal: Arc::clone(&self.journal),
            closed: Arc::clone(&self.closed),
        })
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// One replaying episode.
#[derive(Debug)]
pub struct MockEnv {
    kind: EnvKind,
    index: usize,
    episode: MockEpisode,
    step_index: usize,
    done: bool,
    journal: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Vec<(EnvKind, usize)>>>,
}

impl MockEnv {
    fn observation(&self) -> Result<Observation, EnvError> {
        let png = base64::engine::general_purpose::STANDARD
            .decode(BLANK_FRAME_PNG)
            .map_err(|e| EnvError::Observation(e.to_string()))?;
        let frame = Frame::from_png(png).map_err(|e| EnvError::Observation(e.to_string()))?;

        let mut obs = Observation::default();
        let camera = match self.kind {
            EnvKind::Manipulation => "front_rgb",
            _ => "head_rgb",
        };
        obs.images.insert(camera.to_string(), frame);
        obs.fields.insert("step".into(), json!(self.step_index));
        if self.kind == EnvKind::Manipulation {
            obs.fields.insert(
                "object_informations".into(),
                json!("red cube at [52, 40, 18]; green star at [30, 61, 18]"),
            );
        }
        Ok(obs)
    }

    fn record(&self, action: &str) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(format!("{}#{}:{action}", self.kind.name(), self.index));
        }
    }
}

impl Environment for MockEnv {
    async fn reset(&mut self) -> Result<Observation, EnvError> {
        self.step_index = 0;
        self.done = false;
        self.observation()
    }

    async fn step(
        &mut self,
        action: EnvAction<'_>,
        _context: &StepContext<'_>,
    ) -> Result<StepOutcome, EnvError> {
        if self.done {
            return Err(EnvError::EpisodeFinished);
        }

        let description = match (action, &self.episode.action_space) {
            (EnvAction::Discrete(id), ActionSpace::Discrete { skill_set }) => {
                skill_set.get(id).cloned().ok_or_else(|| {
                    EnvError::Observation(format!("action id {id} is not in the skill set"))
                })?
            }
            (EnvAction::Continuous(values), ActionSpace::Continuous { bounds })
                if values.len() == bounds.dimension() =>
            {
                format!("{values:?}")
            }
            _ => return Err(EnvError::ActionMismatch(self.kind)),
        };
        self.record(&description);

        let scripted = self.episode.steps.get(self.step_index).cloned();
        self.step_index += 1;
        let step = scripted.unwrap_or_else(|| MockStep::new("Nothing happens.", 0.0, true));
        self.done = step.done;

        // Navigation reports silent moves without an env_feedback key.
        let mut info = Map::new();
        if self.kind != EnvKind::Navigation || !step.feedback.is_empty() {
            info.insert("env_feedback".into(), Value::String(step.feedback));
        }
        if self.kind == EnvKind::Navigation {
            info.insert("action_description".into(), Value::String(description));
        }
        info.insert("task_success".into(), json!(step.done && step.reward > 0.0));

        Ok(StepOutcome {
            observation: self.observation()?,
            reward: step.reward,
            done: step.done,
            info,
        })
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        self.done = true;
        if let Ok(mut closed) = self.closed.lock() {
            closed.push((self.kind, self.index));
        }
        Ok(())
    }

    fn instruction(&self) -> &str {
        &self.episode.instruction
    }

    fn action_space(&self) -> &ActionSpace {
        &self.episode.action_space
    }
}

// ---------------------------------------------------------------------------
// Built-in episodes
// ---------------------------------------------------------------------------

fn skills(names: &[&str]) -> ActionSpace {
    ActionSpace::Discrete {
        skill_set: names.iter().map(|s| s.to_string()).collect(),
    }
}

fn default_episodes(kind: EnvKind) -> Vec<MockEpisode> {
    match kind {
        EnvKind::Alfred => vec![
            MockEpisode {
                instruction: "Put a washed apple in the fridge.".into(),
                action_space: skills(&[
                    "find a Apple",
                    "pick up the Apple",
                    "find a SinkBasin",
                    "put down the object in hand",
                    "find a Fridge",
                    "open the Fridge",
                ]),
                steps: vec![
                    MockStep::new("Last action executed successfully.", 0.0, false),
                    MockStep::new("Last action executed successfully.", 0.0, false),
                    MockStep::new("Last action executed successfully.", 0.0, false),
                    MockStep::new("Last action executed successfully.", 1.0, true),
                ],
            },
            MockEpisode {
                instruction: "Examine a book under the desk lamp.".into(),
                action_space: skills(&["find a Book", "pick up the Book", "find a DeskLamp", "turn on the DeskLamp"]),
                steps: vec![
                    MockStep::new("Last action executed successfully.", 0.0, false),
                    MockStep::new("Last action is invalid. Robot is not holding any object.", 0.0, false),
                    MockStep::new("Last action executed successfully.", 0.0, false),
                ],
            },
        ],
        EnvKind::Habitat => vec![
            MockEpisode {
                instruction: "Move one of the bowls to the left counter.".into(),
                action_space: skills(&[
                    "navigate to the left counter",
                    "navigate to the table",
                    "pick up the bowl",
                    "place at the left counter",
                ]),
                steps: vec![
                    MockStep::new("Last action executed successfully.", 0.0, false),
                    MockStep::new("Last action executed successfully.", 0.0, false),
                    MockStep::new("Last action executed successfully.", 1.0, true),
                ],
            },
            MockEpisode {
                instruction: "Find a toy airplane and put it in the sink.".into(),
                action_space: skills(&["navigate to the sofa", "pick up the toy airplane", "navigate to the sink", "place in the sink"]),
                steps: vec![
                    MockStep::new("Last action is invalid. Object not found.", 0.0, false),
                    MockStep::new("Last action executed successfully.", 0.0, false),
                ],
            },
        ],
        EnvKind::Navigation => {
            let moves = skills(&[
                "Move forward by 0.25",
                "Move backward by 0.25",
                "Move rightward by 0.25",
                "Move leftward by 0.25",
                "Rotate to the right by 90 degrees.",
                "Rotate to the left by 90 degrees.",
                "Tilt the camera upward by 30 degrees.",
                "Tilt the camera downward by 30 degrees.",
            ]);
            vec![
                MockEpisode {
                    instruction: "the Television in the room".into(),
                    action_space: moves.clone(),
                    steps: vec![
                        MockStep::new("", 0.0, false),
                        MockStep::new("", 0.0, false),
                        MockStep::new("Reached the target.", 1.0, true),
                    ],
                },
                MockEpisode {
                    instruction: "the Laptop on the desk".into(),
                    action_space: moves,
                    steps: vec![
                        MockStep::new("Last action is blocked by an obstacle.", 0.0, false),
                        MockStep::new("", 0.0, false),
                    ],
                },
            ]
        }
        EnvKind::Manipulation => {
            // Six pose axes on the 0..100 grid, then the gripper.
            let mut high = vec![100.0; 7];
            high[6] = 1.0;
            let arm = ActionSpace::Continuous {
                bounds: ActionBounds::new(vec![0.0; 7], high),
            };
            vec![
                MockEpisode {
                    instruction: "Pick up the red cube and place it into the silver container.".into(),
                    action_space: arm.clone(),
                    steps: vec![
                        MockStep::new("Moved above the red cube.", 0.0, false),
                        MockStep::new("Grasped the red cube.", 0.0, false),
                        MockStep::new("Placed the red cube.", 1.0, true),
                    ],
                },
                MockEpisode {
                    instruction: "Stack the green star on top of the red cube.".into(),
                    action_space: arm,
                    steps: vec![MockStep::new("Gripper closed on nothing.", 0.0, false)],
                },
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn alfred_episode_runs_to_success() {
        let launcher = MockLauncher::new();
        let mut env = launcher.launch(EnvKind::Alfred, 0).await.unwrap();
        let obs = env.reset().await.unwrap();
        assert!(obs.primary_frame().is_some());
        assert_eq!(env.instruction(), "Put a washed apple in the fridge.");

        let mut total_reward = 0.0;
        let mut steps = 0;
        loop {
            let outcome = env
                .step(EnvAction::Discrete(0), &StepContext::default())
                .await
                .unwrap();
            total_reward += outcome.reward;
            steps += 1;
            if outcome.done {
                break;
            }
        }
        assert_eq!(steps, 4);
        assert!((total_reward - 1.0).abs() < f64::EPSILON);
        assert!(matches!(
            env.step(EnvAction::Discrete(0), &StepContext::default()).await,
            Err(EnvError::EpisodeFinished)
        ));
    }

    #[tokio::test]
    async fn index_past_end_is_out_of_range() {
        let launcher = MockLauncher::new();
        assert!(launcher.launch(EnvKind::Habitat, 1).await.is_ok());
        assert!(matches!(
            launcher.launch(EnvKind::Habitat, 2).await,
            Err(EnvError::EpisodeOutOfRange { kind: EnvKind::Habitat, index: 2 })
        ));
    }

    #[tokio::test]
    async fn broken_episode_fails_to_launch() {
        let launcher = MockLauncher::new().with_broken_episode(EnvKind::Alfred, 0);
        assert!(matches!(
            launcher.launch(EnvKind::Alfred, 0).await,
            Err(EnvError::Server { status: 500, .. })
        ));
        assert!(launcher.launch(EnvKind::Alfred, 1).await.is_ok());
    }

    #[tokio::test]
    async fn navigation_reports_action_description() {
        let launcher = MockLauncher::new();
        let mut env = launcher.launch(EnvKind::Navigation, 0).await.unwrap();
        env.reset().await.unwrap();
        let outcome = env
            .step(EnvAction::Discrete(4), &StepContext { reasoning: "turn", turn: 0 })
            .await
            .unwrap();
        assert_eq!(
            EnvKind::Navigation.history_feedback(&outcome),
            "Rotate to the right by 90 degrees."
        );
        assert_eq!(launcher.journal(), vec!["navigation#0:Rotate to the right by 90 degrees."]);
    }

    #[tokio::test]
    async fn manipulation_checks_action_shape() {
        let launcher = MockLauncher::new();
        let mut env = launcher.launch(EnvKind::Manipulation, 0).await.unwrap();
        let obs = env.reset().await.unwrap();
        assert!(obs.object_info().unwrap().contains("red cube"));

        let ctx = StepContext::default();
        assert!(matches!(
            env.step(EnvAction::Discrete(1), &ctx).await,
            Err(EnvError::ActionMismatch(EnvKind::Manipulation))
        ));
        assert!(matches!(
            env.step(EnvAction::Continuous(&[1.0, 2.0]), &ctx).await,
            Err(EnvError::ActionMismatch(_))
        ));
        let outcome = env
            .step(EnvAction::Continuous(&[50.0, 40.0, 30.0, 0.0, 0.0, 0.0, 1.0]), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.env_feedback(), "Moved above the red cube.");
    }

    #[tokio::test]
    async fn stepping_past_script_ends_episode() {
        let launcher = MockLauncher::new();
        let mut env = launcher.launch(EnvKind::Manipulation, 1).await.unwrap();
        env.reset().await.unwrap();
        let action = [0.0; 7];
        let ctx = StepContext::default();
        assert!(!env.step(EnvAction::Continuous(&action), &ctx).await.unwrap().done);
        let last = env.step(EnvAction::Continuous(&action), &ctx).await.unwrap();
        assert!(last.done);
        assert_eq!(last.reward, 0.0);
    }
}
