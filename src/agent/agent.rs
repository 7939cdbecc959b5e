//! The embodied agent: one model call per decision, then action resolution.
//!
//! The agent owns the model handle and nothing else. Prompts come in already
//! built, and what goes out is the raw text, its decomposition, and the
//! actions it resolves to.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::{Prompt, VisionModel};
use crate::response::{
    parse_structure, resolve_continuous_actions, resolve_discrete_actions, ActionBounds,
    ContinuousAction, ParsedResponse, Resolution,
};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Raw and decomposed text of one model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelReply {
    pub raw: String,
    pub parsed: ParsedResponse,
}

/// A decision in a discrete environment.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteDecision {
    pub reply: ModelReply,
    pub resolution: Resolution,
}

/// A decision in the manipulation environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousDecision {
    pub reply: ModelReply,
    /// Actions to execute in order. Never empty.
    pub actions: Vec<ContinuousAction>,
    /// `true` when the plan was unusable and `actions` holds one random sample.
    pub sampled: bool,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Drives a [`VisionModel`] and turns its answers into environment actions.
pub struct EmbodiedAgent<M> {
    model: M,
}

impl<M: VisionModel> EmbodiedAgent<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Call the model once with the current frame, if there is one.
    pub async fn respond(&self, prompt: &Prompt, frame: Option<&Path>) -> Result<ModelReply> {
        let images: Vec<PathBuf> = frame.map(Path::to_path_buf).into_iter().collect();
        let raw = self
            .model
            .respond(&prompt.system, &prompt.user, &images)
            .await
            .context("vision model call failed")?;
        let parsed = parse_structure(&raw);

        if parsed.is_empty() {
            warn!(raw_len = raw.len(), "model returned no usable text");
        }
        debug!(
            reasoning_len = parsed.reasoning.len(),
            answer_len = parsed.answer.len(),
            action_fragment = %parsed.action_fragment,
            "parsed model reply"
        );

        Ok(ModelReply { raw, parsed })
    }

    /// Decide the next action ids in a discrete environment.
    pub async fn decide_discrete(
        &self,
        prompt: &Prompt,
        frame: Option<&Path>,
        max_action_id: i64,
    ) -> Result<DiscreteDecision> {
        let reply = self.respond(prompt, frame).await?;
        let resolution = resolve_discrete_actions(
            &reply.parsed.answer,
            &reply.parsed.action_fragment,
            max_action_id,
        );

        info!(action_ids = ?resolution.to_id_list(), "agent resolved actions");
        Ok(DiscreteDecision { reply, resolution })
    }

    /// Decide the next control vectors in a continuous environment.
    ///
    /// An unusable plan falls back to one action sampled uniformly from
    /// `bounds`, so the result always holds at least one action.
    pub async fn decide_continuous(
        &self,
        prompt: &Prompt,
        frame: Option<&Path>,
        bounds: &ActionBounds,
    ) -> Result<ContinuousDecision> {
        let reply = self.respond(prompt, frame).await?;
        let mut actions = resolve_continuous_actions(&reply.parsed.answer, bounds.dimension(), bounds);

        let sampled = actions.is_empty();
        if sampled {
            warn!("no usable manipulation plan, sampling a random action");
            actions.push(bounds.sample(&mut rand::thread_rng()));
        }

        info!(actions = actions.len(), sampled, "agent resolved control vectors");
        Ok(ContinuousDecision {
            reply,
            actions,
            sampled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    fn prompt() -> Prompt {
        Prompt {
            system: "system".into(),
            user: "user".into(),
        }
    }

    #[tokio::test]
    async fn discrete_decision_from_numbered_reply() {
        let agent = EmbodiedAgent::new(ScriptedModel::new([
            "1. Reasoning: go to the fridge\n2. Answer: open it\n3. Action IDs: 2, 9, 3",
        ]));
        let frame = PathBuf::from("episode_1/frame_0000.png");
        let decision = agent.decide_discrete(&prompt(), Some(frame.as_path()), 5).await.unwrap();

        assert_eq!(decision.reply.parsed.reasoning, "go to the fridge");
        assert_eq!(decision.resolution, Resolution::Resolved(vec![2, 3]));
        assert_eq!(agent.model().calls()[0].images, vec![frame]);
    }

    #[tokio::test]
    async fn unstructured_reply_is_unresolved() {
        let agent = EmbodiedAgent::new(ScriptedModel::new(["no structure at all"]));
        let decision = agent.decide_discrete(&prompt(), None, 5).await.unwrap();
        assert_eq!(decision.resolution.to_id_list(), vec![-1]);
        assert!(agent.model().calls()[0].images.is_empty());
    }

    #[tokio::test]
    async fn continuous_plan_is_clamped() {
        let agent = EmbodiedAgent::new(ScriptedModel::new([
            r#"<answer>{"executable_plan": [{"action": [150, -10, 5, 0, 0, 0, 1]}]}</answer>"#,
        ]));
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        let decision = agent.decide_continuous(&prompt(), None, &bounds).await.unwrap();

        assert!(!decision.sampled);
        assert_eq!(
            decision.actions,
            vec![ContinuousAction(vec![100.0, 0.0, 5.0, 0.0, 0.0, 0.0, 1.0])]
        );
    }

    #[tokio::test]
    async fn broken_plan_falls_back_to_one_sample() {
        let agent = EmbodiedAgent::new(ScriptedModel::new(["<answer>not json</answer>"]));
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        let decision = agent.decide_continuous(&prompt(), None, &bounds).await.unwrap();

        assert!(decision.sampled);
        assert_eq!(decision.actions.len(), 1);
        let action = decision.actions[0].as_slice();
        assert_eq!(action.len(), 7);
        assert!(action.iter().all(|v| (0.0..=100.0).contains(v)));
    }
}
