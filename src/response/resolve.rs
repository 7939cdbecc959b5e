//! Turning parsed model output into executable actions.
//!
//! Discrete environments get a list of action ids, resolved first from a JSON
//! plan in the answer and then, failing that, from bare integers in the action
//! fragment. The manipulation environment gets clamped control vectors taken
//! from the same JSON plan, with no partial recovery.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::json::{coerce_float, coerce_integer, parse_embedded_json};
use super::PlanError;

/// Marker written in place of an action id list when nothing could be resolved.
pub const UNRESOLVED_SENTINEL: i64 = -1;

/// Components a manipulation plan step must carry before it is considered.
pub const MIN_CONTINUOUS_COMPONENTS: usize = 7;

static WHOLE_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("valid integer regex"));

// ---------------------------------------------------------------------------
// Discrete resolution
// ---------------------------------------------------------------------------

/// Outcome of discrete action resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// One or more validated action ids, in execution order.
    Resolved(Vec<usize>),
    /// Nothing executable was found; the turn counts as invalid.
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The validated ids, empty when unresolved.
    pub fn action_ids(&self) -> &[usize] {
        match self {
            Self::Resolved(ids) => ids,
            Self::Unresolved => &[],
        }
    }

    /// Boundary form used in logs: the ids, or `[-1]` when unresolved.
    pub fn to_id_list(&self) -> Vec<i64> {
        match self {
            Self::Resolved(ids) => ids.iter().map(|&id| id as i64).collect(),
            Self::Unresolved => vec![UNRESOLVED_SENTINEL],
        }
    }

    fn from_ids(ids: Vec<usize>) -> Self {
        if ids.is_empty() {
            Self::Unresolved
        } else {
            Self::Resolved(ids)
        }
    }
}

/// Resolve action ids from an `answer` and an optional raw `action_fragment`.
///
/// Valid ids lie in `0..=max_action_id`; a negative `max_action_id` (empty
/// action list) accepts nothing.
pub fn resolve_discrete_actions(answer: &str, action_fragment: &str, max_action_id: i64) -> Resolution {
    match resolve_from_plan(answer, max_action_id) {
        Ok(resolution @ Resolution::Resolved(_)) => return resolution,
        Ok(Resolution::Unresolved) => debug!("JSON plan yielded no valid action ids"),
        Err(err) => debug!(error = %err, "no usable JSON plan in answer"),
    }

    if action_fragment.is_empty() {
        return Resolution::Unresolved;
    }
    resolve_from_bare_integers(action_fragment, max_action_id)
}

fn resolve_from_plan(answer: &str, max_action_id: i64) -> Result<Resolution, PlanError> {
    let data = parse_embedded_json(answer)?;

    let steps = match &data {
        Value::Object(map) if map.contains_key("executable_plan") => &map["executable_plan"],
        Value::Array(_) => &data,
        _ => return Err(PlanError::NotAPlan),
    };
    let Value::Array(steps) = steps else {
        return Err(PlanError::NotAPlan);
    };

    let ids = steps
        .iter()
        .filter_map(|step| step.as_object()?.get("action_id"))
        .filter_map(coerce_integer)
        .filter_map(|id| in_range(id, max_action_id))
        .collect();

    Ok(Resolution::from_ids(ids))
}

fn resolve_from_bare_integers(fragment: &str, max_action_id: i64) -> Resolution {
    let ids = WHOLE_INTEGER
        .find_iter(fragment)
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .filter_map(|id| in_range(id, max_action_id))
        .collect();
    Resolution::from_ids(ids)
}

fn in_range(id: i64, max_action_id: i64) -> Option<usize> {
    (0..=max_action_id).contains(&id).then_some(id as usize)
}

// ---------------------------------------------------------------------------
// Continuous resolution
// ---------------------------------------------------------------------------

/// Per-dimension lower and upper limits of a continuous action space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBounds {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl ActionBounds {
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Self {
        Self { low, high }
    }

    /// The same `[low, high]` interval on every one of `dimension` axes.
    pub fn uniform(dimension: usize, low: f64, high: f64) -> Self {
        Self {
            low: vec![low; dimension],
            high: vec![high; dimension],
        }
    }

    /// Number of dimensions both limit vectors cover.
    pub fn dimension(&self) -> usize {
        self.low.len().min(self.high.len())
    }

    /// Draw one action uniformly from the box.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ContinuousAction {
        let values = self
            .low
            .iter()
            .zip(&self.high)
            .map(|(&lo, &hi)| sample_axis(rng, lo, hi))
            .collect();
        ContinuousAction(values)
    }
}

/// Uniform draw from `[lo, hi]` that stays finite for huge or open ranges.
fn sample_axis<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi <= lo || hi.is_nan() || lo.is_nan() {
        return lo;
    }
    if (hi - lo).is_finite() {
        return rng.gen_range(lo..=hi);
    }
    if lo.is_finite() && hi.is_finite() {
        // The span overflows f64; interpolate instead of subtracting.
        let t: f64 = rng.gen();
        return (lo * (1.0 - t) + hi * t).max(lo).min(hi);
    }
    0.0_f64.max(lo).min(hi)
}

/// A manipulation control vector, already clamped to its action space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuousAction(pub Vec<f64>);

impl ContinuousAction {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Resolve the manipulation plan in `answer` into clamped control vectors.
///
/// Any structural problem discards the whole plan; the caller is expected to
/// substitute a sampled action when the result is empty.
pub fn resolve_continuous_actions(
    answer: &str,
    dimension: usize,
    bounds: &ActionBounds,
) -> Vec<ContinuousAction> {
    match continuous_plan(answer, dimension, bounds) {
        Ok(actions) => actions,
        Err(err) => {
            debug!(error = %err, "discarding manipulation plan");
            Vec::new()
        }
    }
}

fn continuous_plan(
    answer: &str,
    dimension: usize,
    bounds: &ActionBounds,
) -> Result<Vec<ContinuousAction>, PlanError> {
    if bounds.dimension() < dimension {
        return Err(PlanError::BoundsMismatch {
            dimension,
            bounds: bounds.dimension(),
        });
    }

    let data = parse_embedded_json(answer)?;
    let Some(Value::Array(steps)) = data.as_object().and_then(|m| m.get("executable_plan")) else {
        return Ok(Vec::new());
    };

    let mut actions = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let step = step.as_object().ok_or(PlanError::StepNotObject { index })?;
        let values = match step.get("action") {
            None => continue,
            Some(value) if is_falsy(value) => continue,
            Some(Value::Array(values)) if values.len() < MIN_CONTINUOUS_COMPONENTS => continue,
            Some(Value::Array(values)) => values,
            Some(_) => return Err(PlanError::ActionNotArray { index }),
        };
        if values.len() < dimension {
            return Err(PlanError::TooFewComponents {
                index,
                found: values.len(),
                dimension,
            });
        }

        let clamped = values[..dimension]
            .iter()
            .enumerate()
            .map(|(axis, value)| {
                let v = coerce_float(value).ok_or(PlanError::NonNumeric { index, axis })?;
                Ok(v.max(bounds.low[axis]).min(bounds.high[axis]))
            })
            .collect::<Result<Vec<_>, PlanError>>()?;
        actions.push(ContinuousAction(clamped));
    }

    Ok(actions)
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn fenced_plan_filters_out_of_range_and_coerces_strings() {
        let answer = "```json\n{\"executable_plan\":[{\"action_id\":2},{\"action_id\":9},{\"action_id\":\"3\"}]}\n```";
        let resolution = resolve_discrete_actions(answer, "", 5);
        assert_eq!(resolution, Resolution::Resolved(vec![2, 3]));
        assert_eq!(resolution.to_id_list(), vec![2, 3]);
    }

    #[test]
    fn no_structure_is_sentinel() {
        let resolution = resolve_discrete_actions("no structure at all", "", 5);
        assert_eq!(resolution, Resolution::Unresolved);
        assert_eq!(resolution.to_id_list(), vec![-1]);
    }

    #[test]
    fn bare_integer_fallback_filters_range() {
        let resolution = resolve_discrete_actions("garbage", "take action 1, 4, 99 now", 5);
        assert_eq!(resolution.to_id_list(), vec![1, 4]);
    }

    #[test]
    fn trailing_comma_is_tolerated() {
        let resolution = resolve_discrete_actions("{\"executable_plan\": [{\"action_id\": 1,}]}", "", 5);
        assert_eq!(resolution.to_id_list(), vec![1]);
    }

    #[test]
    fn bare_array_plan_is_accepted() {
        let answer = "Plan: [{\"action_id\": 0}, {\"action_id\": 5}, \"skip\", {\"other\": 1}]";
        assert_eq!(resolve_discrete_actions(answer, "", 5).to_id_list(), vec![0, 5]);
    }

    #[test]
    fn object_without_plan_falls_through_to_fragment() {
        let answer = "{\"reasoning\": \"nothing\"}";
        assert_eq!(resolve_discrete_actions(answer, "2", 5).to_id_list(), vec![2]);
        assert_eq!(resolve_discrete_actions(answer, "", 5).to_id_list(), vec![-1]);
    }

    #[test]
    fn plan_with_only_invalid_ids_falls_through() {
        let answer = "{\"executable_plan\": [{\"action_id\": 42}, {\"action_id\": -1}]}";
        assert_eq!(resolve_discrete_actions(answer, "3 and 3", 5).to_id_list(), vec![3, 3]);
    }

    #[test]
    fn plan_wins_over_fragment() {
        let answer = "{\"executable_plan\": [{\"action_id\": 4}]}";
        assert_eq!(resolve_discrete_actions(answer, "1, 2", 5).to_id_list(), vec![4]);
    }

    #[test]
    fn non_array_plan_value_is_stage_failure() {
        let answer = "{\"executable_plan\": {\"action_id\": 1}}";
        assert_eq!(resolve_discrete_actions(answer, "", 5), Resolution::Unresolved);
    }

    #[test]
    fn fragment_ignores_digits_inside_words() {
        let resolution = resolve_discrete_actions("", "step2 then 3, id4 and 0", 5);
        assert_eq!(resolution.to_id_list(), vec![3, 0]);
    }

    #[test]
    fn fragment_with_no_valid_ids_is_sentinel() {
        assert_eq!(resolve_discrete_actions("", "none of 10 or 20", 5), Resolution::Unresolved);
    }

    #[test]
    fn empty_action_list_accepts_nothing() {
        let answer = "{\"executable_plan\": [{\"action_id\": 0}]}";
        assert_eq!(resolve_discrete_actions(answer, "0", -1), Resolution::Unresolved);
    }

    #[test]
    fn discrete_resolution_is_idempotent() {
        let answer = "```json\n[{\"action_id\": 1}, {\"action_id\": 2}]\n```";
        let first = resolve_discrete_actions(answer, "4", 5);
        let second = resolve_discrete_actions(answer, "4", 5);
        assert_eq!(first, second);
    }

    #[test]
    fn continuous_plan_is_clamped_per_dimension() {
        let answer = "{\"executable_plan\": [{\"action\": [150, -10, 5, 0, 0, 0, 1]}]}";
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        let actions = resolve_continuous_actions(answer, 7, &bounds);
        assert_eq!(actions, vec![ContinuousAction(vec![100.0, 0.0, 5.0, 0.0, 0.0, 0.0, 1.0])]);
    }

    #[test]
    fn continuous_takes_leading_components() {
        let answer = "```json\n{\"executable_plan\": [{\"action\": [1, 2, 3, 4, 5, 6, 7, 1, 99]}]}\n```";
        let bounds = ActionBounds::uniform(8, 0.0, 100.0);
        let actions = resolve_continuous_actions(answer, 8, &bounds);
        assert_eq!(actions[0].as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 1.0]);
    }

    #[test]
    fn continuous_skips_short_or_missing_actions() {
        let answer = "{\"executable_plan\": [\
            {\"action\": [1, 2, 3]},\
            {\"description\": \"no action\"},\
            {\"action\": null},\
            {\"action\": [1, 2, 3, 4, 5, 6, 0]}]}";
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        let actions = resolve_continuous_actions(answer, 7, &bounds);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0]);
    }

    #[test]
    fn continuous_aborts_on_non_numeric_component() {
        let answer = "{\"executable_plan\": [\
            {\"action\": [1, 2, 3, 4, 5, 6, 0]},\
            {\"action\": [1, 2, \"left\", 4, 5, 6, 0]}]}";
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        assert!(resolve_continuous_actions(answer, 7, &bounds).is_empty());
    }

    #[test]
    fn continuous_aborts_on_non_object_step() {
        let answer = "{\"executable_plan\": [{\"action\": [1, 2, 3, 4, 5, 6, 0]}, 7]}";
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        assert!(resolve_continuous_actions(answer, 7, &bounds).is_empty());
    }

    #[test]
    fn continuous_aborts_when_shorter_than_dimension() {
        let answer = "{\"executable_plan\": [{\"action\": [1, 2, 3, 4, 5, 6, 0]}]}";
        let bounds = ActionBounds::uniform(8, 0.0, 100.0);
        assert!(resolve_continuous_actions(answer, 8, &bounds).is_empty());
    }

    #[test]
    fn continuous_without_plan_is_empty() {
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        assert!(resolve_continuous_actions("move the arm", 7, &bounds).is_empty());
        assert!(resolve_continuous_actions("[[1, 2, 3, 4, 5, 6, 7]]", 7, &bounds).is_empty());
    }

    #[test]
    fn continuous_resolution_is_idempotent() {
        let answer = "{\"executable_plan\": [{\"action\": [50, 50, 50, 0, 0, 0, 1]}]}";
        let bounds = ActionBounds::uniform(7, 0.0, 100.0);
        assert_eq!(
            resolve_continuous_actions(answer, 7, &bounds),
            resolve_continuous_actions(answer, 7, &bounds)
        );
    }

    #[test]
    fn sampled_action_stays_within_bounds() {
        let bounds = ActionBounds::new(
            vec![0.0, -1.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            vec![100.0, 1.0, 5.0, 100.0, 100.0, 100.0, 1.0, 1.0],
        );
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let action = bounds.sample(&mut rng);
            assert_eq!(action.as_slice().len(), 8);
            for (axis, v) in action.as_slice().iter().enumerate() {
                assert!(*v >= bounds.low[axis] && *v <= bounds.high[axis]);
            }
        }
    }

    #[test]
    fn sampling_survives_extreme_bounds() {
        let bounds = ActionBounds::new(
            vec![-1e308, f64::NEG_INFINITY, 5.0, 10.0],
            vec![1e308, f64::INFINITY, f64::INFINITY, 3.0],
        );
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let action = bounds.sample(&mut rng);
            let v = action.as_slice();
            assert!(v[0].is_finite() && (-1e308..=1e308).contains(&v[0]));
            assert_eq!(v[1], 0.0);
            assert_eq!(v[2], 5.0);
            assert_eq!(v[3], 10.0);
        }
    }
}
