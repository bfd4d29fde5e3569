use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::screening::{run_all_rubrics, EvaluationResult, Rubric};
use crate::server::error::ApiError;
use crate::state::{AppState, SessionStatus};

/// Start evaluating every rubric over every loaded profile in the background.
pub async fn start(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionStatus>), ApiError> {
    let run = state.start_evaluation()?;
    tracing::info!(run_id = %run.run_id, "run started");
    tokio::spawn(run_all_rubrics(state.clone(), run));
    Ok((StatusCode::ACCEPTED, Json(state.status())))
}

pub async fn stop(State(state): State<AppState>) -> Json<SessionStatus> {
    state.stop_evaluation();
    Json(state.status())
}

pub async fn progress(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.status())
}

#[derive(Debug, Serialize)]
pub struct RubricResults {
    pub rubric: Rubric,
    pub results: Vec<EvaluationResult>,
}

pub async fn results(State(state): State<AppState>) -> Json<Vec<RubricResults>> {
    Json(
        state
            .ranked_results()
            .into_iter()
            .map(|(rubric, results)| RubricResults { rubric, results })
            .collect(),
    )
}

pub async fn clear(State(state): State<AppState>) -> StatusCode {
    state.clear_evaluations();
    StatusCode::NO_CONTENT
}
