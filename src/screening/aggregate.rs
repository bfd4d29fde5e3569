//! Per-profile totals, ranking and timing metrics.

use chrono::{DateTime, Utc};

use super::types::{EvaluationResult, EvaluationScore, Rubric};

/// Build a result from normalized scores.
pub fn aggregate(
    profile_id: &str,
    rubric: &Rubric,
    scores: Vec<EvaluationScore>,
    evaluated_at: DateTime<Utc>,
) -> EvaluationResult {
    let total_score: u32 = scores.iter().map(|s| u32::from(s.score)).sum();
    let average_score = if scores.is_empty() {
        0.0
    } else {
        f64::from(total_score) / scores.len() as f64
    };

    EvaluationResult {
        profile_id: profile_id.to_string(),
        rubric_id: rubric.id.clone(),
        scores,
        total_score,
        average_score,
        evaluated_at,
    }
}

/// Sort by descending average score. Ties keep their input order.
pub fn rank_results(results: &mut [EvaluationResult]) {
    results.sort_by(|a, b| b.average_score.total_cmp(&a.average_score));
}

/// Share of a batch's wall time attributed to each of its profiles, at least 1 ms.
pub fn per_profile_time_ms(batch_time_ms: u64, batch_len: usize) -> u64 {
    let n = batch_len.max(1) as f64;
    ((batch_time_ms as f64 / n).round() as u64).max(1)
}

/// Summed per-profile time over wall-clock time.
pub fn actual_speedup(per_profile_times: impl IntoIterator<Item = u64>, wall_ms: u64) -> f64 {
    let sequential: u64 = per_profile_times.into_iter().sum();
    sequential as f64 / wall_ms.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screening::types::RubricItem;

    fn rubric(n: usize) -> Rubric {
        Rubric {
            id: "r".into(),
            title: "t".into(),
            items: (0..n)
                .map(|i| RubricItem {
                    id: format!("item{i}"),
                    description: String::new(),
                    score_descriptions: Default::default(),
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    fn scores(values: &[u8]) -> Vec<EvaluationScore> {
        values
            .iter()
            .enumerate()
            .map(|(i, &score)| EvaluationScore {
                item_id: format!("item{i}"),
                score,
                explanation: String::new(),
            })
            .collect()
    }

    #[test]
    fn average_is_total_over_item_count() {
        let r = aggregate("p", &rubric(3), scores(&[5, 4, 4]), Utc::now());
        assert_eq!(r.total_score, 13);
        assert_eq!(r.average_score, 13.0 / 3.0);
        assert_eq!(r.rubric_id, "r");
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let now = Utc::now();
        let mut results = vec![
            aggregate("low", &rubric(1), scores(&[3]), now),
            aggregate("high", &rubric(1), scores(&[5]), now),
            aggregate("tie-a", &rubric(1), scores(&[4]), now),
            aggregate("tie-b", &rubric(1), scores(&[4]), now),
        ];
        rank_results(&mut results);
        let ids: Vec<_> = results.iter().map(|r| r.profile_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "tie-a", "tie-b", "low"]);
    }

    #[test]
    fn per_profile_time_rounds_with_floor_of_one() {
        assert_eq!(per_profile_time_ms(1000, 3), 333);
        assert_eq!(per_profile_time_ms(1001, 2), 501);
        assert_eq!(per_profile_time_ms(0, 5), 1);
        assert_eq!(per_profile_time_ms(10, 0), 10);
    }

    #[test]
    fn speedup_is_sequential_over_wall() {
        assert_eq!(actual_speedup([100, 100, 100, 100], 100), 4.0);
        assert_eq!(actual_speedup(Vec::new(), 0), 0.0);
    }
}
