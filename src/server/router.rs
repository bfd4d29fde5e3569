use axum::routing::{get, post, put};
use axum::Router;

use super::handlers::probes::{healthz, livez};
use super::handlers::{evaluate, profiles, rubrics, runs};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/profiles", get(profiles::list))
        .route("/api/evaluate", post(evaluate::evaluate))
        .route("/api/evaluate-batch", post(evaluate::evaluate_batch))
        .route("/api/evaluate-concurrent", post(evaluate::evaluate_concurrent))
        .route("/api/rubrics", get(rubrics::list).post(rubrics::create))
        .route(
            "/api/rubrics/{id}",
            put(rubrics::update).delete(rubrics::delete),
        )
        .route("/api/runs", post(runs::start))
        .route("/api/runs/stop", post(runs::stop))
        .route("/api/progress", get(runs::progress))
        .route("/api/results", get(runs::results).delete(runs::clear))
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
        .with_state(state)
}
