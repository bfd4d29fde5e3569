use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::parse_body;
use crate::screening::stream::NDJSON_CONTENT_TYPE;
use crate::screening::{
    self, evaluate_concurrent_stream, BatchEvaluationRequest, BatchEvaluationResponse,
    ChannelEventSink, ConcurrentEvaluationRequest, ConcurrentPlan, EvaluateRequest,
    EvaluateResponse,
};
use crate::server::error::ApiError;
use crate::state::AppState;

pub async fn evaluate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EvaluateResponse>, ApiError> {
    let value: Value = parse_body(&body)?;
    let request = EvaluateRequest::from_value(value)?;
    let response = screening::evaluate(state.gateway.clone(), request, &state.config).await?;
    Ok(Json(response))
}

pub async fn evaluate_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BatchEvaluationResponse>, ApiError> {
    let request: BatchEvaluationRequest = parse_body(&body)?;
    let response = screening::evaluate_batch(state.gateway.as_ref(), request, &state.config).await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub stream: Option<String>,
}

fn wants_stream(query: &StreamQuery, headers: &HeaderMap) -> bool {
    let by_query = matches!(query.stream.as_deref(), Some("1") | Some("true"));
    let by_accept = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(NDJSON_CONTENT_TYPE));
    by_query || by_accept
}

/// Aggregate JSON by default; NDJSON events when asked for.
///
/// Validation runs before any stream is opened, so bad requests always get a
/// 400 JSON body. Once streaming, failures arrive as an `error` event.
pub async fn evaluate_concurrent(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: ConcurrentEvaluationRequest = parse_body(&body)?;
    let plan = ConcurrentPlan::new(request)?;

    if !wants_stream(&query, &headers) {
        let evaluation =
            screening::evaluate_concurrent(state.gateway.clone(), plan, &state.config, None, None)
                .await?;
        return Ok(Json(evaluation.into_response()).into_response());
    }

    let (sink, receiver) = ChannelEventSink::new();
    tokio::spawn(async move {
        // A dropped receiver (client gone) surfaces as a stream error and
        // stops further dispatch.
        if let Err(err) =
            evaluate_concurrent_stream(state.gateway.clone(), plan, &state.config, &sink, None).await
        {
            tracing::warn!(error = %err, "streamed evaluation ended early");
        }
    });

    let lines = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|line| (Ok::<_, Infallible>(line), receiver))
    });

    Ok((
        [
            (CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}
