//! Account settings: position mode and leverage.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::OperationResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PositionModeBody {
    /// True for hedge mode, false for one-way.
    pub hedge_mode: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LeverageRequest {
    pub symbol: String,
    pub leverage: u32,
}

/// Current position mode.
#[utoipa::path(
    get,
    path = "/api/v1/account/position-mode",
    tag = "account",
    responses(
        (status = 200, description = "Position mode", body = PositionModeBody),
        (status = 502, description = "Exchange unavailable")
    )
)]
pub async fn get_position_mode(State(state): State<Arc<AppState>>) -> ApiResult<Json<PositionModeBody>> {
    let hedge_mode = state.executor.get_position_mode().await?;
    Ok(Json(PositionModeBody { hedge_mode }))
}

/// Switch between hedge and one-way mode.
#[utoipa::path(
    put,
    path = "/api/v1/account/position-mode",
    tag = "account",
    request_body = PositionModeBody,
    responses(
        (status = 200, description = "Mode change attempted", body = OperationResponse)
    )
)]
pub async fn set_position_mode(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PositionModeBody>, JsonRejection>,
) -> ApiResult<Json<OperationResponse>> {
    let Json(body) = payload?;
    let changed = state.executor.set_position_mode(body.hedge_mode).await;
    let mode = if body.hedge_mode { "hedge" } else { "one-way" };
    Ok(Json(OperationResponse::outcome(
        changed,
        format!("Position mode is {mode}"),
        format!("Could not switch to {mode} mode"),
    )))
}

/// Set leverage for a symbol.
#[utoipa::path(
    post,
    path = "/api/v1/account/leverage",
    tag = "account",
    request_body = LeverageRequest,
    responses(
        (status = 200, description = "Leverage change attempted", body = OperationResponse),
        (status = 422, description = "Invalid leverage")
    )
)]
pub async fn set_leverage(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LeverageRequest>, JsonRejection>,
) -> ApiResult<Json<OperationResponse>> {
    let Json(request) = payload?;
    if request.leverage == 0 {
        return Err(ApiError::Validation("leverage must be at least 1".to_string()));
    }
    let set = state
        .executor
        .set_leverage(&request.symbol, request.leverage)
        .await;
    Ok(Json(OperationResponse::outcome(
        set,
        format!("Leverage for {} set to {}x", request.symbol, request.leverage),
        format!("Could not set leverage for {}", request.symbol),
    )))
}
