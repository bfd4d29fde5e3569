use axum::extract::State;
use axum::Json;

use crate::screening::Profile;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<Profile>> {
    Json(state.profiles().to_vec())
}
