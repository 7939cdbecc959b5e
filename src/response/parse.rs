//! Structural decomposition of raw model output.
//!
//! Two recognizers run in a fixed order:
//!
//! 1. **Numbered sequence** -- `1. Reasoning: ... 2. Answer: ... 3. Action IDs: ...`
//!    with optional labels, matched case-insensitively across lines.
//! 2. **Tags** -- `<think>`, `<answer>` and `<action>` spans searched
//!    independently of one another.
//!
//! The first recognizer that matches decides the result. Text that matches
//! neither ends up whole in [`ParsedResponse::answer`], on the assumption that
//! the model emitted bare JSON.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static NUMBERED_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)1\.\s*(?:Reasoning:)?\s*(.*?)\s*2\.\s*(?:Answer:)?\s*(.*?)\s*3\.\s*(?:Action(?: IDs)?:)?\s*(.*)",
    )
    .expect("valid numbered sequence regex")
});

static THINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think regex"));

static ANSWER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<answer>(.*?)(?:</answer>|$)").expect("valid answer regex")
});

static ACTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<action>(.*?)(?:</action>|$)").expect("valid action regex")
});

/// The three parts a model response is decomposed into.
///
/// Every field defaults to the empty string; an empty field means the part was
/// not found, which is a normal outcome rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResponse {
    /// Chain-of-thought text.
    pub reasoning: String,
    /// High-level answer; usually where a JSON plan lives.
    pub answer: String,
    /// Raw action directive, e.g. `"3, 7"`.
    pub action_fragment: String,
}

impl ParsedResponse {
    /// `true` when no part was recovered at all.
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_empty() && self.answer.is_empty() && self.action_fragment.is_empty()
    }
}

/// Decompose `text` into reasoning, answer and action fragment. Never fails.
pub fn parse_structure(text: &str) -> ParsedResponse {
    if let Some(parsed) = parse_numbered_sequence(text) {
        return parsed;
    }
    parse_tagged(text)
}

fn parse_numbered_sequence(text: &str) -> Option<ParsedResponse> {
    let caps = NUMBERED_SEQUENCE.captures(text)?;
    Some(ParsedResponse {
        reasoning: caps[1].trim().to_string(),
        answer: caps[2].trim().to_string(),
        action_fragment: caps[3].trim().to_string(),
    })
}

fn parse_tagged(text: &str) -> ParsedResponse {
    let think = THINK_TAG.captures(text);

    let mut parsed = ParsedResponse {
        reasoning: think
            .as_ref()
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default(),
        answer: first_group(&ANSWER_TAG, text),
        action_fragment: first_group(&ACTION_TAG, text),
    };

    if !parsed.answer.is_empty() || !parsed.action_fragment.is_empty() {
        return parsed;
    }

    match think.and_then(|c| c.get(0)) {
        Some(span) => {
            let remainder = text[span.end()..].trim();
            if remainder.contains("<answer>") {
                parsed.answer = first_group(&ANSWER_TAG, remainder);
            }
            if remainder.contains("<action>") {
                parsed.action_fragment = first_group(&ACTION_TAG, remainder);
            }
            if parsed.answer.is_empty() {
                parsed.answer = remainder.to_string();
            }
        }
        None => parsed.answer = text.trim().to_string(),
    }

    parsed
}

fn first_group(re: &Regex, text: &str) -> String {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_sequence_with_labels() {
        let text = "1. Reasoning: The apple is on the counter.\n\
                    2. Answer: Pick it up.\n\
                    3. Action IDs: 4, 12";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "The apple is on the counter.");
        assert_eq!(parsed.answer, "Pick it up.");
        assert_eq!(parsed.action_fragment, "4, 12");
    }

    #[test]
    fn numbered_sequence_labels_are_case_insensitive() {
        let text = "1. REASONING: look left\n2. answer: turn\n3. action ids: 2";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "look left");
        assert_eq!(parsed.answer, "turn");
        assert_eq!(parsed.action_fragment, "2");
    }

    #[test]
    fn numbered_sequence_without_labels() {
        let text = "1. the mug is in the sink\n2. wash it\n3. 5";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "the mug is in the sink");
        assert_eq!(parsed.answer, "wash it");
        assert_eq!(parsed.action_fragment, "5");
    }

    #[test]
    fn numbered_sequence_short_action_label() {
        let text = "1. Reasoning: r\n2. Answer: a\n3. Action: 0";
        assert_eq!(parse_structure(text).action_fragment, "0");
    }

    #[test]
    fn numbered_sequence_wins_over_tags() {
        let text = "<think>hidden</think>\n1. Reasoning: visible\n2. Answer: a\n3. Action IDs: 1";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "visible");
        assert_eq!(parsed.action_fragment, "1");
    }

    #[test]
    fn well_formed_tag_triple() {
        let text = "<think>\n  go to the fridge\n</think>\n<answer> open it </answer>\n<action>3</action>";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "go to the fridge");
        assert_eq!(parsed.answer, "open it");
        assert_eq!(parsed.action_fragment, "3");
    }

    #[test]
    fn unterminated_tags_capture_to_end() {
        let text = "<think>ok</think><action>7, 8";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "ok");
        assert_eq!(parsed.answer, "");
        assert_eq!(parsed.action_fragment, "7, 8");

        let parsed = parse_structure("<answer>{\"executable_plan\": []}");
        assert_eq!(parsed.answer, "{\"executable_plan\": []}");
    }

    #[test]
    fn remainder_after_think_becomes_answer() {
        let text = "<think>plan it</think>\n  {\"executable_plan\": [{\"action_id\": 1}]}  ";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "plan it");
        assert_eq!(parsed.answer, "{\"executable_plan\": [{\"action_id\": 1}]}");
        assert!(parsed.action_fragment.is_empty());
    }

    #[test]
    fn remainder_rescan_recovers_empty_tags() {
        let text = "<think>t</think> <answer></answer> <action></action> tail";
        let parsed = parse_structure(text);
        assert_eq!(parsed.reasoning, "t");
        // Both tags are present but empty, so the raw remainder is kept.
        assert_eq!(parsed.answer, "<answer></answer> <action></action> tail");
    }

    #[test]
    fn unstructured_text_is_all_answer() {
        let text = "  {\"executable_plan\": [{\"action_id\": 2}]}\n";
        let parsed = parse_structure(text);
        assert!(parsed.reasoning.is_empty());
        assert_eq!(parsed.answer, "{\"executable_plan\": [{\"action_id\": 2}]}");
        assert!(parsed.action_fragment.is_empty());
    }

    #[test]
    fn empty_input_is_empty_result() {
        let parsed = parse_structure("");
        assert!(parsed.is_empty());
    }
}
