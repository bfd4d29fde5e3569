use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::parse_body;
use crate::screening::Rubric;
use crate::server::error::ApiError;
use crate::state::{AppState, RubricDraft};

pub async fn list(State(state): State<AppState>) -> Json<Vec<Rubric>> {
    Json(state.rubrics())
}

pub async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Rubric>), ApiError> {
    let draft: RubricDraft = parse_body(&body)?;
    let rubric = state.add_rubric(draft)?;
    tracing::info!(rubric = %rubric.id, items = rubric.items.len(), "rubric created");
    Ok((StatusCode::CREATED, Json(rubric)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Rubric>, ApiError> {
    let draft: RubricDraft = parse_body(&body)?;
    Ok(Json(state.update_rubric(&id, draft)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.delete_rubric(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
