//! A [`VisionModel`] that replays canned responses.
//!
//! Drives `--mock` runs without a GPU server and stands in for the real
//! client in driver tests. Every call is recorded so tests can inspect the
//! prompts that were sent.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;

use super::api::VisionModel;
use crate::env::EnvKind;

/// One recorded `respond` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub system: String,
    pub user: String,
    pub images: Vec<PathBuf>,
}

/// Replays responses in order; the last one repeats once the queue runs dry.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// A well-formed response for each benchmark, used by `--mock` runs.
    pub fn demo(kind: EnvKind) -> Self {
        match kind {
            EnvKind::Manipulation => Self::new([concat!(
                "<think>The red cube sits near the center of the table.</think>\n",
                "<answer>{\"visual_description\": \"a red cube and a silver container\", ",
                "\"reasoning\": \"move above the cube, then close the gripper\", ",
                "\"executable_plan\": [",
                "{\"action\": [52, 40, 30, 0, 60, 0, 1], \"description\": \"hover above the cube\"}, ",
                "{\"action\": [52, 40, 18, 0, 60, 0, 0], \"description\": \"grasp the cube\"}]}</answer>"
            )]),
            _ => Self::new([concat!(
                "1. Reasoning: The target is not visible yet, so start with the first action.\n",
                "2. Answer: {\"executable_plan\": [{\"action_id\": 0}, {\"action_id\": 1}]}\n",
                "3. Action IDs: 0, 1"
            )]),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl VisionModel for ScriptedModel {
    async fn respond(
        &self,
        system_prompt: &str,
        user_text: &str,
        image_paths: &[PathBuf],
    ) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system: system_prompt.to_string(),
                user: user_text.to_string(),
                images: image_paths.to_vec(),
            });
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted model lock poisoned"))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted model lock poisoned"))?;
        if let Some(response) = next {
            *last = response;
        }
        Ok(last.clone())
    }
}
