/// Health and metrics endpoints
///
/// `/api/health` reports the database state alongside the version and stays
/// 200 while the process can answer, so it doubles as a liveness probe.
/// `/api/health/ready` returns 503 until the database answers.
use crate::{context::AppContext, db, error::ApiError};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_latency_ms: Option<u64>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics))
}

async fn check_database(ctx: &AppContext) -> HealthStatus {
    let start = Instant::now();
    match db::test_connection(&ctx.db).await {
        Ok(()) => HealthStatus {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            database: "connected",
            database_latency_ms: Some(
                u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            ),
        },
        Err(e) => {
            tracing::warn!(error = %e, "health_check: database unreachable");
            HealthStatus {
                status: "degraded",
                version: env!("CARGO_PKG_VERSION"),
                database: "disconnected",
                database_latency_ms: None,
            }
        }
    }
}

pub async fn health(State(ctx): State<AppContext>) -> Json<HealthStatus> {
    Json(check_database(&ctx).await)
}

/// Readiness probe: 503 while the database is unreachable
pub async fn readiness_probe(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let health = check_database(&ctx).await;
    let status = if health.database == "connected" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// Prometheus text exposition
async fn metrics(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let body = ctx.metrics.gather()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}
