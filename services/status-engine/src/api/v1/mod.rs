//! API v1 routes.

mod admin;
mod deployments;
mod entities;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/deployments", deployments::routes())
        // Per-service listing: /v1/services/{service}/deployments
        .nest("/services", deployments::service_routes())
        .nest("/entities", entities::routes())
        .nest("/admin", admin::routes())
}
