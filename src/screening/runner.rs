//! Background run: every rubric over every loaded profile.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::{AppState, RunHandle};

use super::evaluate::{
    evaluate_concurrent, ConcurrentPlan, EvaluationConfig, ProfileEvaluated, ProfileObserver,
};
use super::stream::StreamError;
use super::types::{ConcurrentEvaluationRequest, ProgressUpdate};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub completed_rubrics: Vec<String>,
    pub cancelled: bool,
}

struct ProgressObserver<'a> {
    state: &'a AppState,
    run: &'a RunHandle,
}

impl ProfileObserver for ProgressObserver<'_> {
    fn on_profile(&self, event: &ProfileEvaluated) -> Result<(), StreamError> {
        report_progress(
            self.state,
            self.run,
            ProgressUpdate {
                current_profile: Some(event.completed),
                ..Default::default()
            },
        );
        Ok(())
    }
}

/// Progress of a stopped run is cleared and must stay cleared.
fn report_progress(state: &AppState, run: &RunHandle, update: ProgressUpdate) {
    state.update_progress_for(run, update);
}

/// Evaluate each rubric in order, storing results as each one completes.
///
/// The stop flag is honoured between rubrics and between units; a rubric cut
/// short keeps its previous results. The run is marked finished on return.
pub async fn run_all_rubrics(state: AppState, run: RunHandle) -> RunSummary {
    let rubrics = state.rubrics();
    let profiles = state.profiles();
    let config = EvaluationConfig {
        run_id: Some(run.run_id),
        ..(*state.config).clone()
    };

    info!(
        run_id = %run.run_id,
        rubrics = rubrics.len(),
        profiles = profiles.len(),
        "starting evaluation run"
    );

    report_progress(
        &state,
        &run,
        ProgressUpdate {
            current_rubric_index: Some(0),
            total_rubrics: Some(rubrics.len()),
            current_profile: Some(0),
            total_profiles: Some(profiles.len()),
            completed_rubrics: Some(Vec::new()),
            ..Default::default()
        },
    );

    let mut completed: Vec<String> = Vec::new();
    let mut cancelled = false;

    for (index, rubric) in rubrics.iter().enumerate() {
        if run.is_cancelled() {
            cancelled = true;
            break;
        }

        report_progress(
            &state,
            &run,
            ProgressUpdate {
                current_rubric: Some(rubric.title.clone()),
                current_rubric_index: Some(index),
                current_profile: Some(0),
                ..Default::default()
            },
        );

        let plan = match ConcurrentPlan::new(ConcurrentEvaluationRequest {
            profiles: profiles.to_vec(),
            rubric: rubric.clone(),
            max_concurrent: Some(config.max_concurrent.min(profiles.len()).max(1)),
            batch_size: Some(config.batch_size),
        }) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(rubric = %rubric.id, error = %err, "skipping rubric");
                continue;
            }
        };

        let observer = ProgressObserver {
            state: &state,
            run: &run,
        };
        let evaluation = evaluate_concurrent(
            state.gateway.clone(),
            plan,
            &config,
            Some(&observer),
            Some(run.cancel.clone()),
        )
        .await;

        match evaluation {
            Ok(evaluation) if !evaluation.cancelled && !run.is_cancelled() => {
                if let Err(err) = state.set_evaluation_results(&rubric.id, evaluation.results) {
                    warn!(rubric = %rubric.id, error = %err, "discarding results");
                    continue;
                }
                completed.push(rubric.id.clone());
                report_progress(
                    &state,
                    &run,
                    ProgressUpdate {
                        completed_rubrics: Some(completed.clone()),
                        ..Default::default()
                    },
                );
                info!(rubric = %rubric.id, "rubric evaluated");
            }
            Ok(_) => {
                cancelled = true;
                break;
            }
            Err(err) => {
                warn!(rubric = %rubric.id, error = %err, "rubric evaluation failed");
            }
        }
    }

    info!(
        run_id = %run.run_id,
        completed = completed.len(),
        cancelled,
        "evaluation run finished"
    );
    state.finish_evaluation(&run);

    RunSummary {
        run_id: run.run_id,
        completed_rubrics: completed,
        cancelled,
    }
}
