//! Parse and repair LLM response text into per-item scores.
//!
//! Whatever comes back, every profile ends up with exactly one score per
//! rubric item, in rubric order.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::types::{EvaluationScore, Rubric};
use crate::prompts::profile_slot;

pub const DEFAULT_SCORE: u8 = 3;
pub const DEFAULT_EXPLANATION: &str = "Unable to evaluate this item. Default score assigned.";
pub const MISSING_EXPLANATION: &str = "No explanation provided";

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^```(?:json)?\s*\n?").expect("Invalid fence open regex"));

static FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n?```\s*$").expect("Invalid fence close regex"));

/// Strip a leading ```` ``` ```` / ```` ```json ```` fence and a trailing ```` ``` ````.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let start = FENCE_OPEN.find(trimmed).map(|m| m.end()).unwrap_or(0);
    let rest = &trimmed[start..];
    let end = FENCE_CLOSE.find(rest).map(|m| m.start()).unwrap_or(rest.len());
    rest[..end].trim()
}

/// Extract the first balanced `{...}` object from surrounding prose.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let remainder = &raw[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in remainder.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&remainder[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse response text into a JSON object, falling back to an empty map.
pub fn parse_response_object(raw: &str) -> Map<String, Value> {
    let stripped = strip_code_fence(raw);

    let parsed = serde_json::from_str::<Value>(stripped).ok().or_else(|| {
        extract_json(stripped).and_then(|candidate| serde_json::from_str(candidate).ok())
    });

    match parsed {
        Some(Value::Object(map)) => map,
        Some(_) => {
            tracing::warn!("LLM response is JSON but not an object; using defaults");
            Map::new()
        }
        None => {
            if !stripped.is_empty() && stripped != "{}" {
                tracing::warn!(len = stripped.len(), "unparseable LLM response; using defaults");
                tracing::debug!(body = %stripped, "unparseable LLM response body");
            }
            Map::new()
        }
    }
}

/// Round and clamp a raw score into 1..=5. Non-finite input gets the default.
pub fn clamp_score(raw: f64) -> u8 {
    if !raw.is_finite() {
        return DEFAULT_SCORE;
    }
    raw.round().clamp(1.0, 5.0) as u8
}

fn numeric_score(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    score.is_finite().then_some(score)
}

fn score_item(item_id: &str, entry: Option<&Value>) -> EvaluationScore {
    let scored = entry
        .and_then(Value::as_object)
        .and_then(|obj| obj.get("score").and_then(numeric_score).map(|s| (obj, s)));

    match scored {
        Some((obj, score)) => {
            let explanation = obj
                .get("explanation")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(MISSING_EXPLANATION);
            EvaluationScore {
                item_id: item_id.to_string(),
                score: clamp_score(score),
                explanation: explanation.to_string(),
            }
        }
        None => EvaluationScore {
            item_id: item_id.to_string(),
            score: DEFAULT_SCORE,
            explanation: DEFAULT_EXPLANATION.to_string(),
        },
    }
}

fn score_object(obj: Option<&Map<String, Value>>, rubric: &Rubric) -> Vec<EvaluationScore> {
    rubric
        .items
        .iter()
        .map(|item| score_item(&item.id, obj.and_then(|o| o.get(&item.id))))
        .collect()
}

/// Default scores for every item of a rubric.
pub fn default_scores(rubric: &Rubric) -> Vec<EvaluationScore> {
    score_object(None, rubric)
}

/// Normalize a single-profile response keyed by item id.
pub fn normalize_single(raw: &str, rubric: &Rubric) -> Vec<EvaluationScore> {
    let obj = parse_response_object(raw);
    score_object(Some(&obj), rubric)
}

/// Normalize a batch response keyed by `profile_<n>` then item id.
pub fn normalize_batch(raw: &str, rubric: &Rubric, profile_count: usize) -> Vec<Vec<EvaluationScore>> {
    let obj = parse_response_object(raw);
    (0..profile_count)
        .map(|i| {
            let slot = obj.get(&profile_slot(i)).and_then(Value::as_object);
            score_object(slot, rubric)
        })
        .collect()
}
