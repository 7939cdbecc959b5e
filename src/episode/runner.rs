//! Episode driver: runs the agent through a range of episodes of one
//! environment.
//!
//! For every decision the [`EpisodeRunner`]
//!   1. builds the prompt from the instruction, skill set and history,
//!   2. asks the agent for a decision on the latest frame,
//!   3. writes the in-flight log entry,
//!   4. executes the resolved actions in order, saving a frame after each,
//!   5. commits the log entry.
//!
//! Every episode gets its own directory `<label>/episode_{n}` holding the
//! frames, `episode_log.json` and `video.mp4`; the environment directory gets
//! a `run_summary.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::log::{write_json, EpisodeLog};
use super::types::{
    truncate_prompt, EpisodeSummary, PossibleActions, RunSummary, StepLogEntry, VlmInput,
    VlmOutput, CONTINUOUS_ACTIONS_LABEL,
};
use super::video::VideoRecorder;
use crate::agent::EmbodiedAgent;
use crate::config::HarnessConfig;
use crate::env::{
    ActionSpace, EnvAction, EnvError, EnvKind, EnvLauncher, Environment, Observation,
    StepContext,
};
use crate::model::prompt::{discrete_prompt, manipulation_prompt, system_prompt};
use crate::model::VisionModel;
use crate::response::{ActionBounds, Resolution};

/// Feedback recorded for a decision that resolved to no action.
pub const INVALID_ACTION_FEEDBACK: &str = "Invalid action from model";

pub const RUN_SUMMARY_FILE_NAME: &str = "run_summary.json";

/// Number of episodes to attempt; a negative request means "until the dataset
/// runs out", bounded by `cap`.
pub fn episode_count(requested: i64, cap: usize) -> usize {
    usize::try_from(requested).unwrap_or(cap)
}

// ---------------------------------------------------------------------------
// Per-episode state
// ---------------------------------------------------------------------------

struct EpisodeState {
    dir: PathBuf,
    instruction: String,
    log: EpisodeLog,
    video: VideoRecorder,
    /// Most recently saved frame; what the model sees next.
    frame_path: Option<PathBuf>,
    /// Decisions taken so far.
    step: usize,
    done: bool,
    total_reward: f64,
    invalid_turns: usize,
}

impl EpisodeState {
    fn new(dir: &Path, config: &HarnessConfig) -> Self {
        Self {
            dir: dir.to_path_buf(),
            instruction: String::new(),
            log: EpisodeLog::new(dir),
            video: VideoRecorder::new(&config.video, dir),
            frame_path: None,
            step: 0,
            done: false,
            total_reward: 0.0,
            invalid_turns: 0,
        }
    }

    /// Save the observation's frame as `frame_{index:04}.png` and append it
    /// to the video.
    async fn observe(&mut self, obs: &Observation, index: usize) -> Result<()> {
        self.frame_path = match obs.primary_frame() {
            Some(frame) => {
                let path = self.dir.join(format!("frame_{index:04}.png"));
                frame
                    .save(&path)
                    .with_context(|| format!("failed to save {}", path.display()))?;
                self.video.push(frame).await;
                Some(path)
            }
            None => {
                warn!(index, "observation carries no image");
                None
            }
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Drives an [`EmbodiedAgent`] through episodes obtained from a launcher.
pub struct EpisodeRunner<'a, M, L> {
    agent: &'a EmbodiedAgent<M>,
    launcher: &'a L,
    config: &'a HarnessConfig,
    model_id: String,
}

impl<'a, M, L> EpisodeRunner<'a, M, L>
where
    M: VisionModel,
    L: EnvLauncher,
{
    pub fn new(
        agent: &'a EmbodiedAgent<M>,
        launcher: &'a L,
        config: &'a HarnessConfig,
        model_id: &str,
    ) -> Self {
        Self {
            agent,
            launcher,
            config,
            model_id: model_id.to_string(),
        }
    }

    /// Run episodes `start..start + count` of `kind`, writing results under
    /// `<output_root>/<label>/`.
    ///
    /// An index past the end of the dataset stops the run. Any other launch
    /// failure skips the episode, except for Habitat where it stops the run.
    /// Failures inside an episode abandon only that episode.
    pub async fn run_env(
        &self,
        kind: EnvKind,
        start: usize,
        count: usize,
        output_root: &Path,
    ) -> Result<RunSummary> {
        let env_dir = output_root.join(kind.label());
        std::fs::create_dir_all(&env_dir)
            .with_context(|| format!("failed to create {}", env_dir.display()))?;

        let mut summary = RunSummary::new(kind, &self.model_id, start);
        info!(env = %kind, run_id = %summary.run_id, start, count, "starting environment run");

        for index in start..start.saturating_add(count) {
            let mut env = match self.launcher.launch(kind, index).await {
                Ok(env) => env,
                Err(err @ EnvError::EpisodeOutOfRange { .. }) => {
                    info!(env = %kind, index, "episode not in dataset, stopping");
                    summary.halted = Some(err.to_string());
                    break;
                }
                Err(err) if kind.halts_on_any_launch_error() => {
                    error!(env = %kind, index, error = %err, "failed to load episode, stopping");
                    summary.halted = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    error!(env = %kind, index, error = %err, "failed to load episode, skipping");
                    continue;
                }
            };

            let episode_dir = env_dir.join(format!("episode_{}", index + 1));
            if let Err(err) = std::fs::create_dir_all(&episode_dir) {
                if let Err(close_err) = env.close().await {
                    warn!(episode = index, error = %close_err, "failed to close environment");
                }
                return Err(err).with_context(|| format!("failed to create {}", episode_dir.display()));
            }

            let episode = self.run_episode(kind, index, &mut env, &episode_dir).await;
            info!(
                env = %kind,
                episode = index,
                steps = episode.steps,
                reward = episode.total_reward,
                done = episode.done,
                "episode complete"
            );
            summary.episodes.push(episode);
            summary.finished_at = Utc::now();
            write_json(&env_dir.join(RUN_SUMMARY_FILE_NAME), &summary)?;
        }

        summary.finished_at = Utc::now();
        write_json(&env_dir.join(RUN_SUMMARY_FILE_NAME), &summary)?;
        info!(
            env = %kind,
            episodes = summary.episodes.len(),
            successes = summary.successes(),
            output = %env_dir.display(),
            "environment run complete"
        );
        Ok(summary)
    }

    /// Run one loaded episode to completion. Never fails: an error abandons
    /// the episode and is recorded in the summary.
    async fn run_episode(
        &self,
        kind: EnvKind,
        index: usize,
        env: &mut L::Env,
        episode_dir: &Path,
    ) -> EpisodeSummary {
        let started_at = Utc::now();
        let mut state = EpisodeState::new(episode_dir, self.config);

        let result = self.drive(kind, index, env, &mut state).await;
        if let Err(err) = &result {
            error!(env = %kind, episode = index, error = %format!("{err:#}"), "episode abandoned");
        }

        match state.video.finish().await {
            Ok(video) => debug!(
                episode = index,
                video = ?video,
                frames = state.video.frames_written(),
                dropped = state.video.frames_dropped(),
                "video closed"
            ),
            Err(err) => warn!(episode = index, error = %format!("{err:#}"), "failed to finalize video"),
        }
        if let Err(err) = env.close().await {
            warn!(episode = index, error = %err, "failed to close environment");
        }

        EpisodeSummary {
            index,
            instruction: state.instruction,
            steps: state.step,
            total_reward: state.total_reward,
            invalid_turns: state.invalid_turns,
            done: state.done,
            error: result.err().map(|e| format!("{e:#}")),
            episode_dir: state.dir,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(
        &self,
        kind: EnvKind,
        index: usize,
        env: &mut L::Env,
        state: &mut EpisodeState,
    ) -> Result<()> {
        let obs = env.reset().await.context("environment reset failed")?;
        state.instruction = env.instruction().to_string();
        state.observe(&obs, 0).await?;

        let space = env.action_space().clone();
        info!(
            env = %kind,
            episode = index,
            instruction = %state.instruction,
            max_action_id = space.max_action_id(),
            "episode started"
        );

        match space {
            ActionSpace::Discrete { skill_set } => {
                self.discrete_loop(kind, env, state, &skill_set).await
            }
            ActionSpace::Continuous { bounds } => {
                self.continuous_loop(kind, env, state, obs, &bounds).await
            }
        }
    }

    fn vlm_input(
        &self,
        system: &str,
        user: String,
        state: &EpisodeState,
        possible_actions: PossibleActions,
    ) -> VlmInput {
        VlmInput {
            system_prompt: truncate_prompt(system, self.config.run.system_prompt_log_chars),
            user_prompt: user,
            image: state.frame_path.clone(),
            task_instruction: state.instruction.clone(),
            possible_actions,
        }
    }

    async fn discrete_loop(
        &self,
        kind: EnvKind,
        env: &mut L::Env,
        state: &mut EpisodeState,
        skill_set: &[String],
    ) -> Result<()> {
        let system = system_prompt(kind, &self.config.manipulation);
        let max_action_id = skill_set.len() as i64 - 1;
        let mut history: Vec<(usize, String)> = Vec::new();

        while !state.done && state.step < self.config.run.max_steps_per_episode {
            let step = state.step;
            let prompt = discrete_prompt(kind, &system, &state.instruction, skill_set, &history);
            let decision = self
                .agent
                .decide_discrete(&prompt, state.frame_path.as_deref(), max_action_id)
                .await?;

            let input = self.vlm_input(
                &system,
                prompt.user,
                state,
                PossibleActions::List(skill_set.to_vec()),
            );
            let mut entry = StepLogEntry::new(step + 1, input, VlmOutput::from(&decision.reply));
            entry.parsed_action_ids = Some(decision.resolution.to_id_list());
            state.log.write_in_flight(&entry)?;

            match &decision.resolution {
                Resolution::Unresolved => {
                    warn!(env = %kind, step = step + 1, "model reply resolved to no action");
                    entry.env_feedback = Some(INVALID_ACTION_FEEDBACK.to_string());
                    state.invalid_turns += 1;
                }
                Resolution::Resolved(ids) => {
                    let context = StepContext {
                        reasoning: &decision.reply.parsed.reasoning,
                        turn: step,
                    };
                    for &id in ids {
                        let outcome = env
                            .step(EnvAction::Discrete(id), &context)
                            .await
                            .with_context(|| format!("environment step failed on action {id}"))?;
                        state.observe(&outcome.observation, step + 1).await?;
                        history.push((id, kind.history_feedback(&outcome)));

                        let feedback = kind.step_feedback(&outcome);
                        info!(
                            env = %kind,
                            step = step + 1,
                            action_id = id,
                            reward = outcome.reward,
                            done = outcome.done,
                            feedback = %feedback,
                            "executed action"
                        );

                        state.total_reward += outcome.reward;
                        state.done = outcome.done;
                        entry.executed_action = skill_set.get(id).cloned();
                        entry.reward = Some(outcome.reward);
                        entry.done = Some(outcome.done);
                        entry.env_feedback = Some(feedback);
                        entry.info = Some(outcome.info);

                        if state.done {
                            break;
                        }
                    }
                }
            }

            state.log.commit(entry)?;
            state.step += 1;
        }
        Ok(())
    }

    async fn continuous_loop(
        &self,
        kind: EnvKind,
        env: &mut L::Env,
        state: &mut EpisodeState,
        initial: Observation,
        bounds: &ActionBounds,
    ) -> Result<()> {
        let system = system_prompt(kind, &self.config.manipulation);
        let mut obs = initial;

        while !state.done && state.step < self.config.run.max_steps_per_episode {
            let step = state.step;
            let object_info = obs.object_info();
            let prompt = manipulation_prompt(&system, &state.instruction, object_info.as_deref());
            let decision = self
                .agent
                .decide_continuous(&prompt, state.frame_path.as_deref(), bounds)
                .await?;

            let input = self.vlm_input(
                &system,
                prompt.user,
                state,
                PossibleActions::Description(CONTINUOUS_ACTIONS_LABEL.to_string()),
            );
            let mut entry = StepLogEntry::new(step + 1, input, VlmOutput::from(&decision.reply));
            entry.parsed_actions_cnt = Some(decision.actions.len());
            entry.parsed_actions = Some(decision.actions.clone());
            state.log.write_in_flight(&entry)?;

            let context = StepContext {
                reasoning: &decision.reply.parsed.reasoning,
                turn: step,
            };
            for (i, action) in decision.actions.iter().enumerate() {
                entry.action_used = Some(action.clone());
                let outcome = env
                    .step(EnvAction::Continuous(action.as_slice()), &context)
                    .await
                    .with_context(|| format!("environment step failed on action {}", i + 1))?;
                state.observe(&outcome.observation, step + 1).await?;

                let feedback = kind.step_feedback(&outcome);
                info!(
                    env = %kind,
                    step = step + 1,
                    action = i + 1,
                    of = decision.actions.len(),
                    reward = outcome.reward,
                    done = outcome.done,
                    feedback = %feedback,
                    "executed action"
                );

                state.total_reward += outcome.reward;
                state.done = outcome.done;
                entry.reward = Some(outcome.reward);
                entry.done = Some(outcome.done);
                entry.env_feedback = Some(feedback);
                entry.info = Some(outcome.info);
                obs = outcome.observation;

                if state.done {
                    break;
                }
            }

            state.log.commit(entry)?;
            state.step += 1;
        }
        Ok(())
    }
}
