//! Deployment API endpoints.
//!
//! Registration of platform deployment requests and read access to the
//! reconciled deployment documents.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cdp_id::{CdpDeploymentId, LambdaId, TaskDefinitionArn};
use cdp_reconcile::{Deployment, DeploymentRequest};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::state::AppState;

/// Create deployment routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(register_deployment))
        .route("/{deployment_id}", get(get_deployment))
        .route("/lambda/{*lambda_id}", get(get_deployment_by_lambda_id))
}

/// Create per-service routes.
pub fn service_routes() -> Router<AppState> {
    Router::new().route("/{service}/deployments", get(list_service_deployments))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to register a deployment.
#[derive(Debug, Deserialize)]
pub struct RegisterDeploymentRequest {
    /// Issued by the server when absent.
    #[serde(default)]
    pub cdp_deployment_id: Option<CdpDeploymentId>,

    pub environment: String,

    pub service: String,

    pub version: String,

    #[serde(default = "default_instance_count")]
    pub requested_instance_count: u32,

    pub requesting_user: String,

    #[serde(default)]
    pub task_definition: Option<TaskDefinitionArn>,

    #[serde(default)]
    pub lambda_id: Option<LambdaId>,
}

fn default_instance_count() -> u32 {
    1
}

impl From<RegisterDeploymentRequest> for DeploymentRequest {
    fn from(req: RegisterDeploymentRequest) -> Self {
        DeploymentRequest {
            cdp_deployment_id: req
                .cdp_deployment_id
                .unwrap_or_else(CdpDeploymentId::generate),
            environment: req.environment,
            service: req.service,
            version: req.version,
            requested_instance_count: req.requested_instance_count,
            requesting_user: req.requesting_user,
            task_definition: req.task_definition,
            lambda_id: req.lambda_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListDeploymentsQuery {
    #[serde(default)]
    pub environment: Option<String>,
}

/// Response for listing deployments.
#[derive(Debug, Serialize)]
pub struct ListDeploymentsResponse {
    /// Newest first.
    pub items: Vec<Deployment>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a deployment.
///
/// POST /v1/deployments
///
/// Returns 201 for a new deployment and 200 when the id is already known.
async fn register_deployment(
    State(state): State<AppState>,
    Json(req): Json<RegisterDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = state.engine().register_deployment(req.into()).await?;
    let status = if update.changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(update.document)))
}

/// GET /v1/deployments/{deployment_id}
async fn get_deployment(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    let id = CdpDeploymentId::parse(&deployment_id)
        .map_err(|e| ApiError::bad_request("invalid_deployment_id", e.to_string()))?;

    state
        .engine()
        .get_deployment(&id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(
                "deployment_not_found",
                format!("deployment '{id}' not found"),
            )
        })
}

/// GET /v1/deployments/lambda/{*lambda_id}
///
/// Lambda ids may contain slashes, hence the wildcard.
async fn get_deployment_by_lambda_id(
    State(state): State<AppState>,
    Path(lambda_id): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    let lambda_id = LambdaId::parse(&lambda_id)
        .map_err(|e| ApiError::bad_request("invalid_lambda_id", e.to_string()))?;

    state
        .engine()
        .get_deployment_by_lambda_id(&lambda_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(
                "deployment_not_found",
                format!("no deployment linked to lambda '{lambda_id}'"),
            )
        })
}

/// GET /v1/services/{service}/deployments
async fn list_service_deployments(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<ListDeploymentsResponse>, ApiError> {
    let items = state
        .engine()
        .list_deployments_for_service(&service, query.environment.as_deref())
        .await?;
    Ok(Json(ListDeploymentsResponse { items }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_defaults() {
        let req: RegisterDeploymentRequest = serde_json::from_value(serde_json::json!({
            "environment": "dev",
            "service": "service-a",
            "version": "1.2.3",
            "requesting_user": "alice"
        }))
        .unwrap();
        let request = DeploymentRequest::from(req);
        assert_eq!(request.requested_instance_count, 1);
        assert!(!request.cdp_deployment_id.as_str().is_empty());
        assert!(request.lambda_id.is_none());
    }

    #[test]
    fn test_register_request_keeps_supplied_id() {
        let req: RegisterDeploymentRequest = serde_json::from_value(serde_json::json!({
            "cdp_deployment_id": "dep-1",
            "environment": "dev",
            "service": "service-a",
            "version": "1.2.3",
            "requested_instance_count": 3,
            "requesting_user": "alice"
        }))
        .unwrap();
        let request = DeploymentRequest::from(req);
        assert_eq!(request.cdp_deployment_id.as_str(), "dep-1");
        assert_eq!(request.requested_instance_count, 3);
    }
}
