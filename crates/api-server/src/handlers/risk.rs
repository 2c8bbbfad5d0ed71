//! Circuit breaker status handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use risk_manager::{StrikeEvent, StrikeStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::state::AppState;

/// A stop-loss fill counted by the breaker.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StrikeEventResponse {
    pub symbol: String,
    pub side: Option<String>,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub age_secs: i64,
}

impl From<StrikeEvent> for StrikeEventResponse {
    fn from(event: StrikeEvent) -> Self {
        Self {
            symbol: event.symbol,
            side: event.side.map(|side| side.as_str().to_string()),
            size: event.size,
            timestamp: event.timestamp,
            age_secs: event.age_secs,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StrikeStatusResponse {
    pub count: usize,
    pub limit: usize,
    pub tripped: bool,
    /// Seconds until the oldest strike leaves the window.
    pub window_remaining_secs: Option<i64>,
    pub window_secs: i64,
    pub description: String,
    pub events: Vec<StrikeEventResponse>,
}

impl StrikeStatusResponse {
    fn new(status: StrikeStatus, window_secs: i64, description: String) -> Self {
        Self {
            tripped: status.tripped(),
            count: status.count,
            limit: status.limit,
            window_remaining_secs: status.window_remaining_secs,
            window_secs,
            description,
            events: status.events.into_iter().map(StrikeEventResponse::from).collect(),
        }
    }
}

/// Current strike count, window and counted events.
#[utoipa::path(
    get,
    path = "/api/v1/risk/strikes",
    tag = "risk",
    responses(
        (status = 200, description = "Breaker status", body = StrikeStatusResponse)
    )
)]
pub async fn get_strike_status(State(state): State<Arc<AppState>>) -> Json<StrikeStatusResponse> {
    let engine = state.engine.lock().await;
    let status = engine.strike_status(Utc::now());
    let breaker = engine.breaker();
    Json(StrikeStatusResponse::new(
        status,
        breaker.window().num_seconds(),
        breaker.description(),
    ))
}

/// Clear the breaker's strike record.
#[utoipa::path(
    post,
    path = "/api/v1/risk/strikes/reset",
    tag = "risk",
    responses(
        (status = 200, description = "Strikes cleared", body = StrikeStatusResponse)
    )
)]
pub async fn reset_strikes(State(state): State<Arc<AppState>>) -> Json<StrikeStatusResponse> {
    let mut engine = state.engine.lock().await;
    engine.reset_strikes();
    let status = engine.strike_status(Utc::now());
    let breaker = engine.breaker();
    Json(StrikeStatusResponse::new(
        status,
        breaker.window().num_seconds(),
        breaker.description(),
    ))
}
