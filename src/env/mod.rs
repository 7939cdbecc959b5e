//! Simulator environment abstractions and concrete bridges.
//!
//! Every benchmark implements the [`Environment`] trait so the episode driver
//! can run it uniformly; an [`EnvLauncher`] loads one episode at a time.
//!
//! Included bridges:
//! - **Remote** ([`remote`]) -- JSON over HTTP to a simulator server hosting
//!   the four EmbodiedBench environments.
//! - **Mock** ([`mock`]) -- scripted episodes for offline runs and tests.

pub mod frame;
pub mod mock;
pub mod remote;
pub mod traits;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use frame::{Frame, FrameError};
pub use traits::{
    ActionSpace, EnvAction, EnvError, EnvLauncher, Environment, Observation, StepContext,
    StepOutcome,
};

// ---------------------------------------------------------------------------
// Benchmark kinds
// ---------------------------------------------------------------------------

/// The four EmbodiedBench environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvKind {
    /// Household task completion.
    Alfred,
    /// Object rearrangement.
    Habitat,
    /// Navigation to a target object.
    Navigation,
    /// Tabletop manipulation with a continuous arm.
    Manipulation,
}

impl EnvKind {
    /// Every kind, in the order a full run visits them.
    pub const ALL: [EnvKind; 4] = [Self::Alfred, Self::Habitat, Self::Navigation, Self::Manipulation];

    /// Benchmark label, also the name of the output sub-directory.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Alfred => "EB-ALFRED",
            Self::Habitat => "EB-Habitat",
            Self::Navigation => "EB-Navigation",
            Self::Manipulation => "EB-Manipulation",
        }
    }

    /// Short lowercase name used on the CLI and the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alfred => "alfred",
            Self::Habitat => "habitat",
            Self::Navigation => "navigation",
            Self::Manipulation => "manipulation",
        }
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Manipulation)
    }

    /// Habitat cannot skip past a broken episode, so any launch failure ends
    /// its run. The others only stop when the dataset is exhausted.
    pub fn halts_on_any_launch_error(&self) -> bool {
        matches!(self, Self::Habitat)
    }

    /// The `env_feedback` text recorded in the step log.
    pub fn step_feedback(&self, outcome: &StepOutcome) -> String {
        match self {
            Self::Navigation => Value::Object(outcome.info.clone()).to_string(),
            _ => outcome.env_feedback(),
        }
    }

    /// The feedback shown next to an action in the prompt history.
    ///
    /// Navigation falls back to the action description only when the
    /// simulator sent no `env_feedback` key at all.
    pub fn history_feedback(&self, outcome: &StepOutcome) -> String {
        match self {
            Self::Navigation if !outcome.info.contains_key("env_feedback") => outcome
                .info
                .get("action_description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => outcome.env_feedback(),
        }
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// AnyEnv: enum dispatch wrapper for runtime bridge selection
// ---------------------------------------------------------------------------

/// An enum wrapper around the concrete environment types, enabling runtime
/// selection without `dyn` (which is incompatible with async trait methods).
pub enum AnyEnv {
    Remote(remote::RemoteEnv),
    Mock(mock::MockEnv),
}

impl Environment for AnyEnv {
    async fn reset(&mut self) -> Result<Observation, EnvError> {
        match self {
            Self::Remote(e) => e.reset().await,
            Self::Mock(e) => e.reset().await,
        }
    }

    async fn step(
        &mut self,
        action: EnvAction<'_>,
        context: &StepContext<'_>,
    ) -> Result<StepOutcome, EnvError> {
        match self {
            Self::Remote(e) => e.step(action, context).await,
            Self::Mock(e) => e.step(action, context).await,
        }
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        match self {
            Self::Remote(e) => e.close().await,
            Self::Mock(e) => e.close().await,
        }
    }

    fn instruction(&self) -> &str {
        match self {
            Self::Remote(e) => e.instruction(),
            Self::Mock(e) => e.instruction(),
        }
    }

    fn action_space(&self) -> &ActionSpace {
        match self {
            Self::Remote(e) => e.action_space(),
            Self::Mock(e) => e.action_space(),
        }
    }
}

/// Launcher counterpart of [`AnyEnv`].
pub enum AnyLauncher {
    Remote(remote::RemoteLauncher),
    Mock(mock::MockLauncher),
}

impl EnvLauncher for AnyLauncher {
    type Env = AnyEnv;

    async fn launch(&self, kind: EnvKind, index: usize) -> Result<AnyEnv, EnvError> {
        match self {
            Self::Remote(l) => l.launch(kind, index).await.map(AnyEnv::Remote),
            Self::Mock(l) => l.launch(kind, index).await.map(AnyEnv::Mock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome_with(info: Value) -> StepOutcome {
        StepOutcome {
            info: info.as_object().cloned().unwrap_or_default(),
            ..StepOutcome::default()
        }
    }

    #[test]
    fn labels_and_names() {
        assert_eq!(EnvKind::Alfred.label(), "EB-ALFRED");
        assert_eq!(EnvKind::Manipulation.name(), "manipulation");
        assert_eq!(EnvKind::Habitat.to_string(), "EB-Habitat");
        assert!(EnvKind::Manipulation.is_continuous());
        assert!(!EnvKind::Navigation.is_continuous());
    }

    #[test]
    fn navigation_logs_whole_info_as_feedback() {
        let outcome = outcome_with(json!({"action_description": "Move forward by 0.25"}));
        assert_eq!(
            EnvKind::Navigation.step_feedback(&outcome),
            "{\"action_description\":\"Move forward by 0.25\"}"
        );
        assert_eq!(EnvKind::Alfred.step_feedback(&outcome), "");
    }

    #[test]
    fn navigation_history_falls_back_to_action_description() {
        let outcome = outcome_with(json!({"action_description": "Rotate left"}));
        assert_eq!(EnvKind::Navigation.history_feedback(&outcome), "Rotate left");
        assert_eq!(EnvKind::Habitat.history_feedback(&outcome), "");

        let outcome = outcome_with(json!({"env_feedback": "blocked", "action_description": "x"}));
        assert_eq!(EnvKind::Navigation.history_feedback(&outcome), "blocked");
    }

    #[test]
    fn empty_navigation_feedback_is_kept() {
        let outcome = outcome_with(json!({
            "env_feedback": "",
            "action_description": "Move forward by 0.25"
        }));
        assert_eq!(EnvKind::Navigation.history_feedback(&outcome), "");
    }

    #[test]
    fn only_habitat_halts_on_any_launch_error() {
        let halting: Vec<_> = EnvKind::ALL
            .iter()
            .filter(|k| k.halts_on_any_launch_error())
            .collect();
        assert_eq!(halting, vec![&EnvKind::Habitat]);
    }
}
