//! Wire and domain types for rubric screening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Profiles
// =============================================================================

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A candidate's form submission. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub submitted_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub work_availability: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annual_salary_expectation: SalaryExpectation,
    #[serde(default, deserialize_with = "null_as_default")]
    pub work_experiences: Vec<WorkExperience>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub education: Education,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalaryExpectation {
    #[serde(rename = "full-time", default, skip_serializing_if = "Option::is_none")]
    pub full_time: Option<String>,
    #[serde(rename = "part-time", default, skip_serializing_if = "Option::is_none")]
    pub part_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkExperience {
    #[serde(default, deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(rename = "roleName", default, deserialize_with = "null_as_default")]
    pub role_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    #[serde(default, deserialize_with = "null_as_default")]
    pub highest_level: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub degrees: Vec<Degree>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Degree {
    #[serde(default, deserialize_with = "null_as_default")]
    pub degree: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub school: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gpa: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub original_school: String,
    #[serde(rename = "isTop50", default, deserialize_with = "null_as_default")]
    pub is_top50: bool,
}

// =============================================================================
// Rubrics
// =============================================================================

/// Definitions of the five score levels of a rubric item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDescriptions {
    #[serde(rename = "1", default)]
    pub one: String,
    #[serde(rename = "2", default)]
    pub two: String,
    #[serde(rename = "3", default)]
    pub three: String,
    #[serde(rename = "4", default)]
    pub four: String,
    #[serde(rename = "5", default)]
    pub five: String,
}

impl ScoreDescriptions {
    /// Description for a score level in 1..=5; empty for anything else.
    pub fn level(&self, level: u8) -> &str {
        match level {
            1 => &self.one,
            2 => &self.two,
            3 => &self.three,
            4 => &self.four,
            5 => &self.five,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub score_descriptions: ScoreDescriptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rubric {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<RubricItem>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationScore {
    pub item_id: String,
    /// Integer in 1..=5.
    pub score: u8,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub profile_id: String,
    pub rubric_id: String,
    /// One entry per rubric item, in rubric order.
    pub scores: Vec<EvaluationScore>,
    pub total_score: u32,
    pub average_score: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// Transient progress counters for a run over every rubric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationProgress {
    pub current_rubric: String,
    pub current_rubric_index: usize,
    pub total_rubrics: usize,
    pub current_profile: usize,
    pub total_profiles: usize,
    pub completed_rubrics: Vec<String>,
}

/// Partial progress update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub current_rubric: Option<String>,
    pub current_rubric_index: Option<usize>,
    pub total_rubrics: Option<usize>,
    pub current_profile: Option<usize>,
    pub total_profiles: Option<usize>,
    pub completed_rubrics: Option<Vec<String>>,
}

// =============================================================================
// Requests
// =============================================================================

/// Strategy used to evaluate several profiles against one rubric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Optimization {
    #[default]
    Auto,
    /// One all-items prompt per profile, sequentially.
    PromptRedesign,
    /// Sequential multi-profile prompts.
    Batching,
    /// One all-items prompt per profile, through the dispatcher.
    Concurrency,
}

impl Optimization {
    /// Resolve `Auto` for a given profile count.
    pub fn resolve(self, profile_count: usize) -> Self {
        match self {
            Optimization::Auto if profile_count <= 3 => Optimization::Concurrency,
            Optimization::Auto if profile_count <= 10 => Optimization::Batching,
            Optimization::Auto => Optimization::Concurrency,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Optimization::Auto => "auto",
            Optimization::PromptRedesign => "prompt-redesign",
            Optimization::Batching => "batching",
            Optimization::Concurrency => "concurrency",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleEvaluationRequest {
    pub profile: Profile,
    pub rubric: Rubric,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiEvaluationRequest {
    pub profiles: Vec<Profile>,
    pub rubric: Rubric,
    #[serde(default)]
    pub optimization: Optimization,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchEvaluationRequest {
    pub profiles: Vec<Profile>,
    pub rubric: Rubric,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrentEvaluationRequest {
    pub profiles: Vec<Profile>,
    pub rubric: Rubric,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleEvaluationResponse {
    #[serde(flatten)]
    pub result: EvaluationResult,
    pub profile_name: String,
    pub optimization: Optimization,
    pub profile_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiEvaluationResponse {
    pub results: Vec<EvaluationResult>,
    pub total_time: u64,
    pub profile_count: usize,
    pub optimization: Optimization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(
        rename = "totalAPICalls",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_api_calls: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_profiles_per_call: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_speedup: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEvaluationResponse {
    pub results: Vec<EvaluationResult>,
    pub batch_size: usize,
    pub optimization: Optimization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrentEvaluationResponse {
    pub results: Vec<EvaluationResult>,
    pub total_time: u64,
    pub max_concurrent: usize,
    pub actual_speedup: f64,
    pub optimization: Optimization,
}

/// Any response produced by `/api/evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvaluateResponse {
    Single(SingleEvaluationResponse),
    Multi(MultiEvaluationResponse),
}
