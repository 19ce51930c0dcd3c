//! Entity API endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cdp_id::EntityName;
use cdp_reconcile::Entity;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::engine::CreateEntityRequest;
use crate::resources::ResourceCheckResult;
use crate::state::AppState;

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_entity))
        .route("/{name}", get(get_entity))
        .route("/{name}/decommission", post(start_decommission))
        .route("/{name}/resources", get(check_resources))
}

/// Request to start decommissioning an entity.
#[derive(Debug, Deserialize)]
pub struct DecommissionRequest {
    pub triggered_by: String,

    #[serde(default)]
    pub workflows_triggered: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResourcesResponse {
    pub entity: EntityName,
    pub checks: Vec<ResourceCheckResult>,
}

fn parse_name(raw: &str) -> Result<EntityName, ApiError> {
    EntityName::parse(raw).map_err(|e| ApiError::bad_request("invalid_entity_name", e.to_string()))
}

/// POST /v1/entities
///
/// Returns 201 when created, 200 when the entity already existed.
async fn create_entity(
    State(state): State<AppState>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = state.engine().create_entity(req).await?;
    let status = if update.changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(update.document)))
}

/// GET /v1/entities/{name}
async fn get_entity(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Entity>, ApiError> {
    let name = parse_name(&name)?;
    state
        .engine()
        .get_entity(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("entity_not_found", format!("entity '{name}' not found")))
}

/// POST /v1/entities/{name}/decommission
async fn start_decommission(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<DecommissionRequest>,
) -> Result<Json<Entity>, ApiError> {
    let name = parse_name(&name)?;
    if req.triggered_by.trim().is_empty() {
        return Err(ApiError::bad_request(
            "invalid_request",
            "triggered_by is required",
        ));
    }

    let update = state
        .engine()
        .start_decommission(&name, &req.triggered_by, req.workflows_triggered)
        .await?;
    Ok(Json(update.document))
}

/// GET /v1/entities/{name}/resources
async fn check_resources(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ResourcesResponse>, ApiError> {
    let name = parse_name(&name)?;
    let checks = state.engine().check_entity_resources(&name).await?;
    Ok(Json(ResourcesResponse {
        entity: name,
        checks,
    }))
}
