//! HTTP bridge to a simulator server.
//!
//! The simulators themselves are heavyweight Python/Unity/physics stacks, so
//! they run in a separate process that exposes each benchmark over JSON:
//!
//! - `POST   {base_url}/envs`            -- body: `{"kind", "eval_set", "episode_index"}`;
//!   `404` when the index is past the end of the dataset.
//! - `POST   {base_url}/envs/{id}/reset` -- returns [`ResetResponse`].
//! - `POST   {base_url}/envs/{id}/step`  -- body: `{"action", "reasoning", "turn"}`;
//!   returns [`StepResponse`].
//! - `DELETE {base_url}/envs/{id}`
//!
//! Images travel as base64-encoded PNG.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::frame::Frame;
use super::traits::{
    ActionSpace, EnvAction, EnvError, EnvLauncher, Environment, Observation, StepContext,
    StepOutcome,
};
use super::EnvKind;
use crate::config::{http_client, SimulatorConfig};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    env_id: String,
}

/// An observation as sent by the server.
#[derive(Debug, Default, Deserialize)]
struct WireObservation {
    #[serde(default)]
    images: BTreeMap<String, String>,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl WireObservation {
    fn decode(self) -> Result<Observation, EnvError> {
        let images = self
            .images
            .into_iter()
            .map(|(key, encoded)| {
                Frame::from_base64(&encoded)
                    .map(|frame| (key.clone(), frame))
                    .map_err(|e| EnvError::Observation(format!("image {key:?}: {e}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Observation {
            images,
            fields: self.fields,
        })
    }
}

/// Body of a successful reset.
#[derive(Debug, Deserialize)]
struct ResetResponse {
    observation: WireObservation,
    #[serde(default)]
    instruction: String,
    action_space: ActionSpace,
}

/// Body of a successful step.
#[derive(Debug, Deserialize)]
struct StepResponse {
    #[serde(default)]
    observation: WireObservation,
    #[serde(default)]
    reward: f64,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    info: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Creates [`RemoteEnv`] sessions on a simulator server.
#[derive(Debug, Clone)]
pub struct RemoteLauncher {
    base_url: String,
    eval_set: String,
    http: reqwest::Client,
}

impl RemoteLauncher {
    pub fn new(config: &SimulatorConfig) -> Result<Self, EnvError> {
        let http = http_client(config.request_timeout_secs)?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            eval_set: config.eval_set.clone(),
            http,
        })
    }
}

impl EnvLauncher for RemoteLauncher {
    type Env = RemoteEnv;

    async fn launch(&self, kind: EnvKind, index: usize) -> Result<RemoteEnv, EnvError> {
        let body = serde_json::json!({
            "kind": kind.name(),
            "eval_set": self.eval_set,
            "episode_index": index,
        });
        let resp = self
            .http
            .post(format!("{}/envs", self.base_url))
            .json(&body)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(EnvError::EpisodeOutOfRange { kind, index });
        }
        let launched: LaunchResponse = check_status(resp).await?.json().await?;

        debug!(kind = %kind, index, env_id = %launched.env_id, "simulator session created");

        Ok(RemoteEnv {
            base_url: self.base_url.clone(),
            http: self.http.clone(),
            env_id: launched.env_id,
            kind,
            instruction: String::new(),
            action_space: ActionSpace::Discrete {
                skill_set: Vec::new(),
            },
            done: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Environment session
// ---------------------------------------------------------------------------

/// One episode hosted by the simulator server.
#[derive(Debug)]
pub struct RemoteEnv {
    base_url: String,
    http: reqwest::Client,
    env_id: String,
    kind: EnvKind,
    instruction: String,
    action_space: ActionSpace,
    done: bool,
}

impl RemoteEnv {
    fn url(&self, suffix: &str) -> String {
        format!("{}/envs/{}{}", self.base_url, self.env_id, suffix)
    }
}

impl Environment for RemoteEnv {
    async fn reset(&mut self) -> Result<Observation, EnvError> {
        self.done = false;

        let resp = self.http.post(self.url("/reset")).send().await?;
        let reset: ResetResponse = check_status(resp).await?.json().await?;

        self.instruction = reset.instruction;
        self.action_space = reset.action_space;

        debug!(
            kind = %self.kind,
            instruction = %self.instruction,
            "simulator episode reset"
        );

        reset.observation.decode()
    }

    async fn step(
        &mut self,
        action: EnvAction<'_>,
        context: &StepContext<'_>,
    ) -> Result<StepOutcome, EnvError> {
        if self.done {
            return Err(EnvError::EpisodeFinished);
        }

        let action = match (action, &self.action_space) {
            (EnvAction::Discrete(id), ActionSpace::Discrete { .. }) => Value::from(id),
            (EnvAction::Continuous(values), ActionSpace::Continuous { .. }) => Value::from(values),
            _ => return Err(EnvError::ActionMismatch(self.kind)),
        };
        let body = serde_json::json!({
            "action": action,
            "reasoning": context.reasoning,
            "turn": context.turn,
        });

        let resp = self.http.post(self.url("/step")).json(&body).send().await?;
        let step: StepResponse = check_status(resp).await?.json().await?;
        self.done = step.done;

        Ok(StepOutcome {
            observation: step.observation.decode()?,
            reward: step.reward,
            done: step.done,
            info: step.info,
        })
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        let resp = self.http.delete(self.url("")).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    fn instruction(&self) -> &str {
        &self.instruction
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EnvError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(EnvError::Server {
        status: status.as_u16(),
        body,
    })
}
