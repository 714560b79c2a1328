//! API Module
//!
//! HTTP API layer for the trigger server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Triggers
        .route("/api/trigger", post(run::trigger))
        // Runs
        .route("/api/runs", get(run::list_runs).post(run::start_run))
        .route("/api/runs/{id}", get(run::get_run))
        .route("/api/runs/{id}/logs", get(run::get_run_logs))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use dockhand_core::definition::{HostTarget, PipelineDefinition, Secrets};
    use dockhand_core::domain::run::{PipelineRun, RunState};
    use dockhand_core::error::PipelineError;
    use dockhand_runner::Pipeline;
    use dockhand_runner::testing::{FakeBuilder, FakeHost, FakeRegistry};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    const DEFINITION: &str = r#"
name = "tutorials"
branch = "main"

[registry]
host = "registry.example.com"
namespace = "acme"

[[service]]
name = "backend"
context = "backend"

[[service]]
name = "frontend"
context = "frontend"

[deploy]
descriptor = "/srv/tutorials/compose.yml"
"#;

    const DESCRIPTOR: &str = r#"
project: tutorials
services:
  backend:
    image: registry.example.com/acme/backend:latest
  frontend:
    image: registry.example.com/acme/frontend:latest
    depends_on: [backend]
"#;

    fn secrets() -> Secrets {
        Secrets {
            registry: None,
            host: HostTarget {
                address: "203.0.113.10".to_string(),
                user: None,
                port: 22,
                identity: None,
            },
        }
    }

    fn state_with(secrets: crate::state::SecretsSource) -> (AppState, FakeHost) {
        let registry = FakeRegistry::new();
        let host = FakeHost::new(registry.clone());
        host.put_file("/srv/tutorials/compose.yml", DESCRIPTOR);

        let pipeline = Pipeline::new(
            PipelineDefinition::parse(DEFINITION).unwrap(),
            Arc::new(FakeBuilder::new()),
            Arc::new(registry),
            Arc::new(host.clone()),
        );
        (AppState::new(pipeline, secrets), host)
    }

    fn state() -> (AppState, FakeHost) {
        state_with(Arc::new(|| -> Result<Secrets, PipelineError> { Ok(secrets()) }))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn wait_for_terminal(state: &AppState, id: Uuid) -> PipelineRun {
        for _ in 0..200 {
            if let Some(run) = state.runs.find_by_id(id) {
                if run.state.is_terminal() {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {id} did not finish");
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state();
        let (status, body) = send(create_router(state), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pipeline"], "tutorials");
    }

    #[tokio::test]
    async fn test_push_to_other_branch_is_ignored() {
        let (state, host) = state();
        let (status, body) = send(
            create_router(state.clone()),
            post_json("/api/trigger", serde_json::json!({"ref": "refs/heads/feature/x"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], false);
        assert!(state.runs.list_all().is_empty());
        assert_eq!(host.connects(), 0);
    }

    #[tokio::test]
    async fn test_push_to_watched_branch_runs_pipeline() {
        let (state, host) = state();
        let (status, body) = send(
            create_router(state.clone()),
            post_json("/api/trigger", serde_json::json!({"ref": "refs/heads/main"})),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);
        let id: Uuid = serde_json::from_value(body["run_id"].clone()).unwrap();

        let run = wait_for_terminal(&state, id).await;
        assert_eq!(run.state, RunState::Succeeded);
        assert_eq!(host.started(), vec!["tutorials-backend", "tutorials-frontend"]);

        let (status, body) =
            send(create_router(state.clone()), get(&format!("/api/runs/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "Succeeded");
        assert_eq!(body["stages"].as_array().unwrap().len(), 5);

        let (status, body) =
            send(create_router(state), get(&format!("/api/runs/{id}/logs"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_runs_are_listed_newest_first() {
        let (state, _) = state();

        let (status, first) =
            send(create_router(state.clone()), post_json("/api/runs", Value::Null)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(first["trigger"], "Manual");
        let (_, second) =
            send(create_router(state.clone()), post_json("/api/runs", Value::Null)).await;

        let (status, body) = send(create_router(state), get("/api/runs")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&Value> = body.as_array().unwrap().iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&second["id"], &first["id"]]);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let (state, _) = state();
        let (status, body) = send(
            create_router(state),
            get(&format!("/api/runs/{}", Uuid::new_v4())),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_secrets_rejects_trigger() {
        let (state, host) = state_with(Arc::new(|| -> Result<Secrets, PipelineError> {
            Err(PipelineError::InvalidDefinition(
                "DOCKHAND_HOST environment variable not set".to_string(),
            ))
        }));

        let (status, body) =
            send(create_router(state.clone()), post_json("/api/runs", Value::Null)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("DOCKHAND_HOST"));
        assert!(state.runs.list_all().is_empty());
        assert_eq!(host.connects(), 0);
    }
}
