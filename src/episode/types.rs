//! Records written by the episode driver.
//!
//! [`StepLogEntry`] is the per-decision record persisted to
//! `episode_log.json`; [`EpisodeSummary`] and [`RunSummary`] describe whole
//! episodes and environment runs in `run_summary.json`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agent::ModelReply;
use crate::env::EnvKind;
use crate::response::ContinuousAction;

/// What the manipulation log shows instead of an action list.
pub const CONTINUOUS_ACTIONS_LABEL: &str = "Continuous control (7 DOF + gripper)";

// ---------------------------------------------------------------------------
// Step log
// ---------------------------------------------------------------------------

/// The model input of one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlmInput {
    /// Truncated system prompt, see [`truncate_prompt`].
    pub system_prompt: String,
    pub user_prompt: String,
    /// Frame shown to the model, if the observation carried one.
    pub image: Option<PathBuf>,
    pub task_instruction: String,
    pub possible_actions: PossibleActions,
}

/// The skill set of a discrete episode, or a description of a continuous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PossibleActions {
    List(Vec<String>),
    Description(String),
}

/// The model output of one decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VlmOutput {
    pub raw: String,
    pub thinking: String,
    pub answer: String,
    pub action_content: String,
}

impl From<&ModelReply> for VlmOutput {
    fn from(reply: &ModelReply) -> Self {
        Self {
            raw: reply.raw.clone(),
            thinking: reply.parsed.reasoning.clone(),
            answer: reply.parsed.answer.clone(),
            action_content: reply.parsed.action_fragment.clone(),
        }
    }
}

/// One decision point of an episode.
///
/// The outcome fields stay `None` until an action has been executed, and are
/// overwritten by each action of a multi-action plan, so they always describe
/// the last action that ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLogEntry {
    /// 1-based decision index.
    pub step: usize,
    pub vlm_input: VlmInput,
    pub vlm_output: VlmOutput,

    /// Resolved ids, or `[-1]` when nothing resolved. Discrete episodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_action_ids: Option<Vec<i64>>,
    /// Number of control vectors to execute. Continuous episodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_actions_cnt: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_actions: Option<Vec<ContinuousAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_used: Option<ContinuousAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Map<String, Value>>,
}

impl StepLogEntry {
    pub fn new(step: usize, vlm_input: VlmInput, vlm_output: VlmOutput) -> Self {
        Self {
            step,
            vlm_input,
            vlm_output,
            parsed_action_ids: None,
            parsed_actions_cnt: None,
            parsed_actions: None,
            action_used: None,
            executed_action: None,
            reward: None,
            done: None,
            env_feedback: None,
            info: None,
        }
    }
}

/// Keep the first `max_chars` characters of a prompt and mark the cut.
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    let mut truncated: String = prompt.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Outcome of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    /// Dataset index of the episode (0-based).
    pub index: usize,
    pub instruction: String,
    /// Decisions taken.
    pub steps: usize,
    pub total_reward: f64,
    /// Decisions whose reply resolved to no action.
    pub invalid_turns: usize,
    /// Whether the environment reported the episode as finished.
    pub done: bool,
    /// Set when the episode was abandoned part-way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub episode_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Outcome of running one environment over an episode range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub env: EnvKind,
    pub model_id: String,
    pub start_episode: usize,
    pub episodes: Vec<EpisodeSummary>,
    /// Why the run stopped before the end of the requested range, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(env: EnvKind, model_id: &str, start_episode: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            env,
            model_id: model_id.to_string(),
            start_episode,
            episodes: Vec::new(),
            halted: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Episodes that ran to completion with a positive reward.
    pub fn successes(&self) -> usize {
        self.episodes
            .iter()
            .filter(|e| e.done && e.error.is_none() && e.total_reward > 0.0)
            .count()
    }

    pub fn mean_reward(&self) -> f64 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.episodes.iter().map(|e| e.total_reward).sum();
        sum / self.episodes.len() as f64
    }
}
