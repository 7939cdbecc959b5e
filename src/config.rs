use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Complete configuration for an evaluation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub model: ModelConfig,
    pub simulator: SimulatorConfig,
    pub run: RunConfig,
    pub video: VideoConfig,
    pub manipulation: ManipulationConfig,
}

/// Vision-language model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API (e.g. a vLLM server).
    pub api_base: String,
    /// Model identifier (default: "nvidia/Cosmos-Reason2-8B").
    pub model_id: String,
    /// Bearer token; empty means fall back to `HF_TOKEN` / `OPENAI_API_KEY`.
    pub api_key: String,
    /// Upper bound on generated tokens per decision (default: 4096).
    pub max_new_tokens: u32,
    /// Per-request timeout. Unset means wait for the reply however long
    /// generation takes.
    pub request_timeout_secs: Option<u64>,
}

/// Simulator server the remote environments talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub base_url: String,
    /// Dataset split requested for every environment (default: "base").
    pub eval_set: String,
    /// Per-request timeout. Unset means block until the simulator answers.
    pub request_timeout_secs: Option<u64>,
}

/// Episode loop limits and output layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    /// Decisions per episode before it is cut off (default: 50).
    pub max_steps_per_episode: usize,
    /// Episode count used when the run is asked to go until the dataset is
    /// exhausted (default: 1000).
    pub unbounded_episode_cap: usize,
    /// Characters of the system prompt kept in each log entry (default: 200).
    pub system_prompt_log_chars: usize,
}

/// Per-episode video encoding through an external ffmpeg binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    /// Frames per second (default: 5.0).
    pub fps: f64,
    pub ffmpeg_path: PathBuf,
    /// ffmpeg video codec (default: "mpeg4").
    pub codec: String,
}

/// Coordinate space described to the model for EB-Manipulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManipulationConfig {
    /// Upper bound of the discretised position axes (default: 100).
    pub max_coord: u32,
    /// Upper bound of the discretised rotation axes (default: 100).
    pub max_rot: u32,
    /// Degrees per rotation unit (default: 3.6).
    pub rot_degrees: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".into(),
            model_id: "nvidia/Cosmos-Reason2-8B".into(),
            api_key: String::new(),
            max_new_tokens: 4096,
            request_timeout_secs: None,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5005".into(),
            eval_set: "base".into(),
            request_timeout_secs: None,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("cosmos_outputs"),
            max_steps_per_episode: 50,
            unbounded_episode_cap: 1000,
            system_prompt_log_chars: 200,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 5.0,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            codec: "mpeg4".into(),
        }
    }
}

impl Default for ManipulationConfig {
    fn default() -> Self {
        Self {
            max_coord: 100,
            max_rot: 100,
            rot_degrees: 3.6,
        }
    }
}

/// A reqwest client that only times out when a timeout is configured.
pub fn http_client(timeout_secs: Option<u64>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build()
}

impl ModelConfig {
    /// The configured key, else `HF_TOKEN`, else `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        ["HF_TOKEN", "OPENAI_API_KEY"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    }
}
