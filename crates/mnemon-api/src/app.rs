use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use mnemon_bus::FleetStatus;
use mnemon_dispatch::Dispatcher;
use mnemon_patterns::LifecycleReducer;
use mnemon_store::Store;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

/// The read/health surface. Everything here is read-only: mutations enter
/// the system exclusively through the bus.
pub fn build_app(
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<LifecycleReducer>,
    fleet_status: watch::Receiver<FleetStatus>,
    auth_token: Arc<String>,
) -> Router {
    let state = AppState { store, dispatcher, lifecycle, fleet_status, auth_token };

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/status", get(handlers::status))
        // Patterns
        .route("/patterns", get(handlers::list_patterns))
        .route("/patterns/disabled", get(handlers::list_disabled))
        .route("/patterns/:id", get(handlers::get_pattern))
        .route("/patterns/:id/lineage", get(handlers::get_pattern_lineage))
        // Review pairs
        .route("/pairs", get(handlers::list_pairs))
        .route("/candidates", get(handlers::list_candidates))
        // FSM instances
        .route("/fsm/:kind/:entity", get(handlers::get_fsm))
        // Dispatch internals
        .route("/quarantine", get(handlers::list_quarantined))
        .route("/routes", get(handlers::list_routes))
        // Auth middleware applies to all routes above
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mnemon_dispatch::{DispatcherConfig, HandlerRegistry, QuarantineSink};
    use mnemon_store::InMemoryStore;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    fn test_app() -> Router {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            HandlerRegistry::new(),
            Arc::new(QuarantineSink::default()),
            DispatcherConfig::default(),
        ));
        let lifecycle = Arc::new(LifecycleReducer::new(store.clone(), 0.5));
        // A receiver keeps serving the last value after the sender drops.
        let (_tx, rx) = watch::channel(FleetStatus::Idle);
        build_app(store, dispatcher, lifecycle, rx, Arc::new(TEST_TOKEN.to_string()))
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_idle_fleet() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/status")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn patterns_empty_list() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/patterns")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_pattern_status_is_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/patterns?status=SHINY"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_fsm_is_404() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/fsm/ingestion/nope"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_fsm_kind_is_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/fsm/blender/nope"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
