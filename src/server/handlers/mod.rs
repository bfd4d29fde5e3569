pub mod evaluate;
pub mod probes;
pub mod profiles;
pub mod rubrics;
pub mod runs;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use super::error::ApiError;

/// Parse a JSON body, reporting failures as `{"error": ...}` with 400.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))
}
