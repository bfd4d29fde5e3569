//! Report generation for screening results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::aggregate::rank_results;
use super::types::{EvaluationResult, Profile, Rubric};

#[derive(Debug, Clone, Serialize)]
pub struct ReportOptions {
    pub top_n: usize,
    pub include_explanations: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_n: 5,
            include_explanations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreeningReport {
    pub generated_at: DateTime<Utc>,
    pub rubrics: Vec<RubricReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RubricReport {
    pub rubric_id: String,
    pub title: String,
    pub evaluated: usize,
    pub top: Vec<ReportEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub rank: usize,
    pub profile_id: String,
    pub name: String,
    pub average_score: f64,
    pub total_score: u32,
    pub max_score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanations: Option<Vec<(String, u8, String)>>,
}

/// Top-N candidates per rubric.
///
/// Rubrics listed in `rubrics` come first, in that order; results for rubric
/// ids not listed follow in first-seen order and are titled by their id.
pub fn build_report(
    results: &[EvaluationResult],
    rubrics: &[Rubric],
    profiles: &[Profile],
    opts: &ReportOptions,
) -> ScreeningReport {
    let names: HashMap<&str, &str> = profiles
        .iter()
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .collect();

    let mut order: Vec<(String, String)> = rubrics
        .iter()
        .map(|r| (r.id.clone(), r.title.clone()))
        .collect();
    let mut grouped: HashMap<String, Vec<EvaluationResult>> = HashMap::new();
    for result in results {
        if !order.iter().any(|(id, _)| id == &result.rubric_id) {
            order.push((result.rubric_id.clone(), result.rubric_id.clone()));
        }
        grouped
            .entry(result.rubric_id.clone())
            .or_default()
            .push(result.clone());
    }

    let rubrics = order
        .into_iter()
        .filter_map(|(rubric_id, title)| {
            let mut ranked = grouped.remove(&rubric_id)?;
            rank_results(&mut ranked);
            let evaluated = ranked.len();
            let top = ranked
                .iter()
                .take(opts.top_n)
                .enumerate()
                .map(|(i, r)| ReportEntry::from_result(i + 1, r, &names, opts))
                .collect();
            Some(RubricReport {
                rubric_id,
                title,
                evaluated,
                top,
            })
        })
        .collect();

    ScreeningReport {
        generated_at: Utc::now(),
        rubrics,
    }
}

impl ReportEntry {
    fn from_result(
        rank: usize,
        result: &EvaluationResult,
        names: &HashMap<&str, &str>,
        opts: &ReportOptions,
    ) -> Self {
        let name = names
            .get(result.profile_id.as_str())
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string())
            .unwrap_or_else(|| result.profile_id.clone());

        Self {
            rank,
            profile_id: result.profile_id.clone(),
            name,
            average_score: result.average_score,
            total_score: result.total_score,
            max_score: result.scores.len() as u32 * 5,
            explanations: opts.include_explanations.then(|| {
                result
                    .scores
                    .iter()
                    .map(|s| (s.item_id.clone(), s.score, s.explanation.clone()))
                    .collect()
            }),
        }
    }
}

pub fn render_report_markdown(report: &ScreeningReport) -> String {
    let mut out = String::new();
    out.push_str("# Screening Report\n\n");
    out.push_str(&format!(
        "- Generated: {}\n",
        report.generated_at.to_rfc3339()
    ));
    out.push_str(&format!("- Rubrics: {}\n", report.rubrics.len()));

    for rubric in &report.rubrics {
        out.push_str(&format!("\n## {}\n\n", rubric.title));
        out.push_str(&format!(
            "Top {} of {} evaluated candidates.\n\n",
            rubric.top.len(),
            rubric.evaluated
        ));
        for entry in &rubric.top {
            out.push_str(&format!(
                "{}. {} (avg {:.2}, total {}/{})\n",
                entry.rank, entry.name, entry.average_score, entry.total_score, entry.max_score
            ));
            if let Some(explanations) = &entry.explanations {
                for (item_id, score, explanation) in explanations {
                    out.push_str(&format!("   - `{item_id}` {score}: {explanation}\n"));
                }
            }
        }
    }

    out
}
