//! Position handlers: listing, closing and protective order management.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use exchange_core::types::Position;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::OperationResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Open position with inferred stop-loss and take-profit levels.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PositionResponse {
    pub symbol: String,
    /// "long" or "short".
    pub side: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub last_price: Option<Decimal>,
    /// Gain in percent at the last price.
    pub profit_pct: Option<Decimal>,
}

impl From<Position> for PositionResponse {
    fn from(position: Position) -> Self {
        let profit_pct = position
            .last_price
            .and_then(|price| position.profit_pct(price))
            .map(|pct| pct.round_dp(4));
        Self {
            side: position.side.as_str().to_string(),
            symbol: position.symbol,
            size: position.size,
            entry_price: position.entry_price,
            unrealized_pnl: position.unrealized_pnl,
            stop_loss_price: position.stop_loss_price,
            take_profit_price: position.take_profit_price,
            last_price: position.last_price,
            profit_pct,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClosePositionRequest {
    pub symbol: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PartialCloseRequest {
    pub symbol: String,
    /// Contracts to close; capped at the position size.
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetSlTpRequest {
    pub symbol: String,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

/// List open positions.
#[utoipa::path(
    get,
    path = "/api/v1/positions",
    tag = "positions",
    responses(
        (status = 200, description = "Open positions", body = Vec<PositionResponse>),
        (status = 502, description = "Exchange unavailable")
    )
)]
pub async fn list_positions(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<PositionResponse>>> {
    let positions = state.executor.get_open_positions().await?;
    Ok(Json(positions.into_iter().map(PositionResponse::from).collect()))
}

/// Close every open position on a symbol.
#[utoipa::path(
    post,
    path = "/api/v1/positions/close",
    tag = "positions",
    request_body = ClosePositionRequest,
    responses(
        (status = 200, description = "Close attempted", body = OperationResponse)
    )
)]
pub async fn close_position(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ClosePositionRequest>, JsonRejection>,
) -> ApiResult<Json<OperationResponse>> {
    let Json(request) = payload?;
    let closed = state.executor.close_position(&request.symbol).await;
    Ok(Json(OperationResponse::outcome(
        closed,
        format!("Closed {}", request.symbol),
        format!("Could not close {}", request.symbol),
    )))
}

/// Close every open position on every symbol.
#[utoipa::path(
    post,
    path = "/api/v1/positions/close-all",
    tag = "positions",
    responses(
        (status = 200, description = "Close-all attempted", body = OperationResponse)
    )
)]
pub async fn close_all_positions(State(state): State<Arc<AppState>>) -> Json<OperationResponse> {
    let closed = state.executor.close_all_positions().await;
    Json(OperationResponse::outcome(
        closed,
        "All positions closed",
        "One or more positions could not be closed",
    ))
}

/// Reduce a position by an amount.
#[utoipa::path(
    post,
    path = "/api/v1/positions/partial-close",
    tag = "positions",
    request_body = PartialCloseRequest,
    responses(
        (status = 200, description = "Partial close attempted", body = OperationResponse),
        (status = 422, description = "Invalid amount")
    )
)]
pub async fn partial_close(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PartialCloseRequest>, JsonRejection>,
) -> ApiResult<Json<OperationResponse>> {
    let Json(request) = payload?;
    if request.amount <= Decimal::ZERO {
        return Err(ApiError::Validation("amount must be positive".to_string()));
    }
    let closed = state
        .executor
        .partial_close(&request.symbol, request.amount)
        .await;
    Ok(Json(OperationResponse::outcome(
        closed,
        format!("Reduced {} by up to {}", request.symbol, request.amount),
        format!("Could not reduce {}", request.symbol),
    )))
}

/// Replace a position's stop-loss and take-profit orders.
#[utoipa::path(
    put,
    path = "/api/v1/positions/sltp",
    tag = "positions",
    request_body = SetSlTpRequest,
    responses(
        (status = 200, description = "SL/TP replaced", body = OperationResponse),
        (status = 422, description = "Invalid price")
    )
)]
pub async fn set_position_sltp(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SetSlTpRequest>, JsonRejection>,
) -> ApiResult<Json<OperationResponse>> {
    let Json(request) = payload?;
    for (label, price) in [("stop_loss", request.stop_loss), ("take_profit", request.take_profit)] {
        if price.is_some_and(|p| p <= Decimal::ZERO) {
            return Err(ApiError::Validation(format!("{label} must be positive")));
        }
    }

    let placed = state
        .executor
        .set_position_sltp(&request.symbol, request.stop_loss, request.take_profit)
        .await;
    Ok(Json(OperationResponse::outcome(
        placed,
        format!("Protection updated for {}", request.symbol),
        format!("Protection for {} was not fully placed", request.symbol),
    )))
}
