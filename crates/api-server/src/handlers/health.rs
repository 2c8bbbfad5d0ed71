//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
    /// Exchange connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        exchange: None,
    })
}

/// Readiness check endpoint (includes an exchange round trip).
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Exchange is unreachable", body = ErrorResponse)
    )
)]
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    state
        .executor
        .get_position_mode()
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("exchange: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        exchange: Some("connected".to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use exchange_core::api::PaperExchange;
    use exchange_core::config::Config;

    fn state(paper: PaperExchange) -> Arc<AppState> {
        Arc::new(AppState::with_gateway(Arc::new(paper), &Config::default()))
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_readiness_connected() {
        let response = readiness(State(state(PaperExchange::new()))).await.unwrap();
        assert_eq!(response.status, "ready");
        assert_eq!(response.exchange.as_deref(), Some("connected"));
    }

    #[tokio::test]
    async fn test_readiness_unavailable_when_exchange_fails() {
        let paper = PaperExchange::new();
        paper.set_offline(true).await;

        let err = readiness(State(state(paper))).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
