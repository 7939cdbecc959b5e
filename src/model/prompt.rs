//! Prompt templates for the four EmbodiedBench environments.
//!
//! Discrete environments (ALFRED, Habitat, Navigation) ask for the numbered
//! reasoning / answer / action-id format and list the episode's skill set.
//! Manipulation asks for a JSON plan of 7-DOF gripper poses instead.

use crate::config::ManipulationConfig;
use crate::env::EnvKind;

/// Output format requested from the model in discrete environments.
pub const REASONING_FORMAT: &str = "
You MUST STRICTLY follow this numbered format:
1. Reasoning: <your step-by-step reasoning>
2. Answer: <your high-level answer or plan>
3. Action IDs: <comma-separated list of integer action IDs>
";

/// Output format requested from the model in the manipulation environment.
pub const MANIPULATION_REASONING_FORMAT: &str = "
Answer the question in the following sequence:
1. your reasoning
2. your answer
3. your selected action as a list of 8 floats
";

const DISCRETE_ROLE: &str = "You observe the scene through images and must complete a task by choosing actions from a discrete action set.
You are provided with a list of available actions and their descriptions.
You are also provided with a list of previous actions and their descriptions.
you only have to choose the action_id(s) from the available actions and output strictly in the format provided";

const NAVIGATION_STRATEGY: &str = "Strategy:
1. Locate the target object in the image and describe its spatial location.
2. Use Move forward and Move right/left as primary navigation strategy.
3. Use Rotation sparingly, only when you lose sight of the target.
4. Try to get as close as possible to the target before stopping.";

/// The system and user text of one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

// ---------------------------------------------------------------------------
// System prompts
// ---------------------------------------------------------------------------

/// System prompt for an environment. Constant across an episode.
pub fn system_prompt(kind: EnvKind, manipulation: &ManipulationConfig) -> String {
    match kind {
        EnvKind::Alfred => format!(
            "You are an intelligent embodied robot operating in a household environment.\n\
             {DISCRETE_ROLE}\n\n{REASONING_FORMAT}\n"
        ),
        EnvKind::Habitat => format!(
            "You are an intelligent embodied robot operating in a home environment with a rearrangement task.\n\
             {DISCRETE_ROLE}\n\n\n{REASONING_FORMAT}\n"
        ),
        EnvKind::Navigation => format!(
            "You are an intelligent embodied robot navigating in a household environment.\n\
             Your goal is to navigate to a target object. You observe the scene through images and choose movement actions.\n\
             {DISCRETE_ROLE}\n\n{NAVIGATION_STRATEGY}\n\n{REASONING_FORMAT}\n"
        ),
        EnvKind::Manipulation => manipulation_system_prompt(manipulation),
    }
}

fn manipulation_system_prompt(config: &ManipulationConfig) -> String {
    let ManipulationConfig {
        max_coord,
        max_rot,
        rot_degrees,
    } = config;

    format!(
        r#"You are a Franka Panda robot with a parallel gripper performing tabletop manipulation tasks.
You observe the scene through multiple camera views and must output gripper actions.
You have to strictly follow the reasoning and output format provided.

Input Space:
- Each object is a 3D position [X, Y, Z] on the table surface.
- There is a red XYZ coordinate frame in the top-left corner of the table.
- The allowed range of X, Y, Z is [0, {max_coord}].

Output Action Space:
- Each action is [X, Y, Z, Roll, Pitch, Yaw, Gripper_state]
- X, Y, Z: gripper position (range [0, {max_coord}])
- Roll, Pitch, Yaw: orientation as discrete Euler angles (range [0, {max_rot}], each unit = {rot_degrees} degrees)
- Gripper_state: 0=close, 1=open

{MANIPULATION_REASONING_FORMAT}

Your answer MUST be valid JSON with the following structure:
{{
  "visual_description": "describe the scene layout and objects",
  "reasoning": "your step-by-step reasoning about how to accomplish the task",
  "executable_plan": [
    {{"action": [X, Y, Z, Roll, Pitch, Yaw, Gripper_state], "description": "what this action does"}}
  ]
}}
"#
    )
}

// ---------------------------------------------------------------------------
// User prompts
// ---------------------------------------------------------------------------

/// Build the prompt for one decision in a discrete environment.
///
/// `history` holds every executed `(action_id, feedback)` pair of the episode
/// so far, oldest first.
pub fn discrete_prompt(
    kind: EnvKind,
    system: &str,
    instruction: &str,
    skill_set: &[String],
    history: &[(usize, String)],
) -> Prompt {
    let max_action_id = skill_set.len() as i64 - 1;
    let actions = action_list(skill_set);

    let history_section = if history.is_empty() {
        String::new()
    } else {
        let lines = format_history(history, skill_set);
        match kind {
            EnvKind::Navigation => format!("## Previous action history:\n{lines}"),
            _ => format!(
                "## Previous action history:\n{lines}\n\nReflect on the history and decide next action(s)."
            ),
        }
    };

    let user = match kind {
        EnvKind::Navigation => format!(
            "## Available actions (id 0 ~ {max_action_id}):\n{actions}\n\n\
             ## Task: Navigate to {instruction}\n\n\
             {history_section}\n\n\
             Looking at the current observation image, decide the next action to execute.\n\
             Output your answer strictly following the provided format."
        ),
        _ => format!(
            "## Available actions (id 0 ~ {max_action_id}):\n{actions}\n\n\
             ## Task instruction: {instruction}\n\n\
             {history_section}\n\n\
             Looking at the current observation image, decide the next action(s) to execute.\n\
             Output your answer strictly following the provided format."
        ),
    };

    Prompt {
        system: system.to_string(),
        user,
    }
}

/// Build the prompt for one manipulation decision. Manipulation carries no
/// action history.
pub fn manipulation_prompt(system: &str, instruction: &str, object_info: Option<&str>) -> Prompt {
    let object_info = object_info
        .filter(|info| !info.is_empty())
        .unwrap_or("See images for object positions");

    let user = format!(
        "## Task instruction: {instruction}\n\n\
         ## Current object positions:\n{object_info}\n\n\n\n\
         Looking at the current observation images, plan the gripper actions to complete the task.\n\
         Output your answer as valid JSON."
    );

    Prompt {
        system: system.to_string(),
        user,
    }
}

/// One `  action id {i}: {description}` line per action.
pub fn action_list(skill_set: &[String]) -> String {
    skill_set
        .iter()
        .enumerate()
        .map(|(i, action)| format!("  action id {i}: {action}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per executed action, numbered from 1.
pub fn format_history(history: &[(usize, String)], skill_set: &[String]) -> String {
    history
        .iter()
        .enumerate()
        .map(|(i, (action_id, feedback))| {
            let name = skill_set
                .get(*action_id)
                .cloned()
                .unwrap_or_else(|| format!("invalid({action_id})"));
            format!(
                "  Step {}: action_id={action_id} ({name}), feedback: {feedback}",
                i + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills() -> Vec<String> {
        vec!["find a Apple".into(), "pick up the Apple".into()]
    }

    #[test]
    fn action_list_lines() {
        assert_eq!(
            action_list(&skills()),
            "  action id 0: find a Apple\n  action id 1: pick up the Apple"
        );
        assert_eq!(action_list(&[]), "");
    }

    #[test]
    fn history_names_actions_and_flags_unknown_ids() {
        let history = vec![(1, "ok".to_string()), (7, "failed".to_string())];
        assert_eq!(
            format_history(&history, &skills()),
            "  Step 1: action_id=1 (pick up the Apple), feedback: ok\n  Step 2: action_id=7 (invalid(7)), feedback: failed"
        );
    }

    #[test]
    fn alfred_prompt_reflects_on_history() {
        let system = system_prompt(EnvKind::Alfred, &ManipulationConfig::default());
        assert!(system.contains("household environment"));
        assert!(system.contains("3. Action IDs:"));

        let prompt = discrete_prompt(EnvKind::Alfred, &system, "Wash the apple.", &skills(), &[]);
        assert!(prompt.user.starts_with("## Available actions (id 0 ~ 1):\n  action id 0"));
        assert!(prompt.user.contains("## Task instruction: Wash the apple."));
        assert!(!prompt.user.contains("Previous action history"));

        let history = vec![(0, "Last action executed successfully.".to_string())];
        let prompt = discrete_prompt(EnvKind::Alfred, &system, "Wash the apple.", &skills(), &history);
        assert!(prompt.user.contains("## Previous action history:\n  Step 1: action_id=0"));
        assert!(prompt.user.contains("Reflect on the history"));
        assert_eq!(prompt.system, system);
    }

    #[test]
    fn navigation_prompt_has_no_reflection_line() {
        let system = system_prompt(EnvKind::Navigation, &ManipulationConfig::default());
        assert!(system.contains("Strategy:"));

        let history = vec![(1, "".to_string())];
        let prompt = discrete_prompt(EnvKind::Navigation, &system, "the Sofa", &skills(), &history);
        assert!(prompt.user.contains("## Task: Navigate to the Sofa"));
        assert!(prompt.user.contains("## Previous action history:"));
        assert!(!prompt.user.contains("Reflect"));
        assert!(prompt.user.contains("decide the next action to execute"));
    }

    #[test]
    fn manipulation_system_prompt_states_coordinate_space() {
        let config = ManipulationConfig {
            max_coord: 80,
            max_rot: 120,
            rot_degrees: 3.0,
        };
        let system = system_prompt(EnvKind::Manipulation, &config);
        assert!(system.contains("The allowed range of X, Y, Z is [0, 80]."));
        assert!(system.contains("range [0, 120], each unit = 3 degrees"));
        assert!(system.contains("\"executable_plan\": ["));
        assert!(system.contains("list of 8 floats"));
    }

    #[test]
    fn manipulation_prompt_falls_back_without_object_info() {
        let prompt = manipulation_prompt("sys", "Stack the cubes.", None);
        assert!(prompt.user.contains("## Current object positions:\nSee images for object positions"));

        let prompt = manipulation_prompt("sys", "Stack the cubes.", Some("cube at [1, 2, 3]"));
        assert!(prompt.user.contains("cube at [1, 2, 3]"));
        assert!(prompt.user.ends_with("Output your answer as valid JSON."));
    }
}
