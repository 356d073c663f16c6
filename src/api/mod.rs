//! Admin HTTP surface using Axum.
//!
//! A small ops-facing API: health plus manual triggers for rollup,
//! backfill, and tendency recalculation. Ingest does not flow through
//! HTTP; it is a library call on [`AggregationEngine`].
//!
//! [`AggregationEngine`]: crate::engine::AggregationEngine

pub mod envelope;
pub mod handlers;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `AIOLOS_CORS_ORIGINS` to a comma-separated list of allowed origins
/// for development tooling.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("AIOLOS_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        }
        Err(_) => CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    }
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route(
            "/api/v1/admin/rollup/ten-minute",
            post(handlers::trigger_ten_minute_rollup),
        )
        .route(
            "/api/v1/admin/rollup/hourly",
            post(handlers::trigger_hourly_rollup),
        )
        .route(
            "/api/v1/admin/backfill/ten-minute",
            post(handlers::trigger_ten_minute_backfill),
        )
        .route(
            "/api/v1/admin/backfill/hourly",
            post(handlers::trigger_hourly_backfill),
        )
        .route(
            "/api/v1/admin/tendencies/recalculate",
            post(handlers::recalculate_tendencies),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::AggregationEngine;
    use crate::storage::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let engine = Arc::new(AggregationEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        create_app(ApiState { engine })
    }

    #[tokio::test]
    async fn test_health_reports_store_stats() {
        let resp = app()
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["data"]["status"], "healthy");
        assert_eq!(v["data"]["backend"], "memory");
        assert_eq!(v["data"]["records"]["one_minute_count"], 0);
    }

    #[tokio::test]
    async fn test_rollup_trigger_on_empty_store() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/rollup/ten-minute")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["data"]["stations"], 0);
    }

    #[tokio::test]
    async fn test_recalculate_rejects_unknown_resolution() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/tendencies/recalculate?resolution=weekly")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_backfill_trigger_returns_counts() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/backfill/hourly")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["data"]["intervals_rolled"], 0);
        assert_eq!(v["data"]["intervals_checked"], 6);
    }
}
