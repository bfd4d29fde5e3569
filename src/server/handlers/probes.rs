use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn livez() -> &'static str {
    tracing::debug!("service is live");
    "ok"
}

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    tracing::debug!("service is healthy");
    Json(json!({
        "status": "ok",
        "profiles": state.profiles().len(),
        "isEvaluating": state.is_evaluating(),
    }))
}
