//! HTTP surface checks against an in-memory engine.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use cdp_events::RunMode;
use cdp_reconcile::ReconcileConfig;
use cdp_status_engine::{
    api,
    artifacts::StaticArtifactResolver,
    engine::StatusEngine,
    resources::{ResourceCheckKind, StaticResourceCheck},
    state::AppState,
    store::InMemoryStatusStore,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_router() -> axum::Router {
    let engine = StatusEngine::new(
        Arc::new(InMemoryStatusStore::new()),
        Arc::new(StaticArtifactResolver::new().with_artifact(
            "service-a",
            "1.0.0",
            "service-a",
            RunMode::Service,
        )),
        ReconcileConfig::with_environments(["dev", "prod"]),
    )
    .with_resource_check(Arc::new(StaticResourceCheck::new(
        ResourceCheckKind::ContainerRepository,
        ["service-a"],
    )));
    api::create_router(AppState::new(Arc::new(engine)))
}

async fn send(
    router: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn health_endpoints_report_ok() {
    let router = test_router();

    let (status, body) = send(&router, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&router, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["components"]["status_store"]["status"], "ok");
}

#[tokio::test]
async fn register_and_read_deployment() {
    let router = test_router();
    let request = json!({
        "cdp_deployment_id": "dep-1",
        "environment": "dev",
        "service": "service-a",
        "version": "1.0.0",
        "requested_instance_count": 2,
        "requesting_user": "alice",
        "lambda_id": "ecs-svc/1"
    });

    let (status, body) = send(&router, Method::POST, "/v1/deployments", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "requested");

    let (status, _) = send(&router, Method::POST, "/v1/deployments", Some(request)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, Method::GET, "/v1/deployments/dep-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "service-a");

    let (status, body) = send(&router, Method::GET, "/v1/deployments/lambda/ecs-svc/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cdp_deployment_id"], "dep-1");

    let (status, body) = send(
        &router,
        Method::GET,
        "/v1/services/service-a/deployments?environment=dev",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &router,
        Method::GET,
        "/v1/services/service-a/deployments?environment=prod",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn missing_deployment_is_problem_json() {
    let router = test_router();
    let request = Request::builder()
        .uri("/v1/deployments/nope")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), 1024 * 1024).await.unwrap())
            .unwrap();
    assert_eq!(body["code"], "deployment_not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn register_rejects_blank_fields() {
    let router = test_router();
    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/deployments",
        Some(json!({
            "environment": "dev",
            "service": "service-a",
            "version": " ",
            "requesting_user": "alice"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn entity_lifecycle_over_http() {
    let router = test_router();

    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/entities",
        Some(json!({"name": "service-a", "type": "microservice", "teams": ["platform"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "creating");

    let (status, body) = send(&router, Method::GET, "/v1/entities/service-a/resources", None).await;
    assert_eq!(status, StatusCode::OK);
    let checks = body["checks"].as_array().unwrap();
    assert_eq!(checks.len(), 6);
    let container = checks
        .iter()
        .find(|c| c["check"] == "container_repository")
        .unwrap();
    assert_eq!(container["state"], "present");

    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/entities/service-a/decommission",
        Some(json!({"triggered_by": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Nothing was ever created in any environment.
    assert_eq!(body["status"], "decommissioned");

    let (status, body) = send(&router, Method::POST, "/v1/admin/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entities_updated"], 0);
}

#[tokio::test]
async fn decommission_unknown_entity_is_not_found() {
    let router = test_router();
    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/entities/ghost/decommission",
        Some(json!({"triggered_by": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "entity_not_found");
}
