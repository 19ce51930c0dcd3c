//! Operator endpoints.

use axum::{extract::State, routing::post, Json, Router};

use crate::api::error::ApiError;
use crate::engine::SweepReport;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/sweep", post(run_sweep))
}

/// POST /v1/admin/sweep
///
/// Runs one bulk status sweep outside the periodic schedule.
async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.engine().run_bulk_status_sweep().await?))
}
