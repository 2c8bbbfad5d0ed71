//! Order placement and cancellation handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use exchange_core::types::{OrderKind, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trading_engine::{PlaceOrderRequest, TrackedOrder};
use utoipa::ToSchema;

use super::OperationResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn default_order_kind() -> OrderKind {
    OrderKind::Market
}

/// Request to place an entry order.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaceOrderBody {
    pub symbol: String,
    /// "buy" or "sell".
    #[schema(value_type = String)]
    pub side: OrderSide,
    /// "market" or "limit".
    #[serde(default = "default_order_kind")]
    #[schema(value_type = String)]
    pub order_type: OrderKind,
    pub amount: Decimal,
    /// Limit price (required for limit orders).
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<u32>,
    /// Stop-loss distance from the realized entry, in percent.
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    /// Take-profit distance from the realized entry, in percent.
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
    #[serde(default)]
    pub reduce_only: bool,
}

impl PlaceOrderBody {
    fn validate(&self) -> ApiResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(ApiError::Validation("amount must be positive".to_string()));
        }
        if self.order_type == OrderKind::Limit && self.price.is_none() {
            return Err(ApiError::Validation("limit orders require a price".to_string()));
        }
        for (label, pct) in [("stop_loss_pct", self.stop_loss_pct), ("take_profit_pct", self.take_profit_pct)] {
            if pct.is_some_and(|p| p <= Decimal::ZERO || p >= Decimal::ONE_HUNDRED) {
                return Err(ApiError::Validation(format!("{label} must be between 0 and 100")));
            }
        }
        Ok(())
    }
}

impl From<PlaceOrderBody> for PlaceOrderRequest {
    fn from(body: PlaceOrderBody) -> Self {
        Self {
            symbol: body.symbol,
            side: body.side,
            order_type: body.order_type,
            amount: body.amount,
            price: body.price,
            leverage: body.leverage,
            stop_loss_pct: body.stop_loss_pct,
            take_profit_pct: body.take_profit_pct,
            reduce_only: body.reduce_only,
        }
    }
}

/// Order placed through this service.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TrackedOrderResponse {
    pub id: String,
    pub symbol: String,
    pub order_type: String,
    pub side: String,
    pub placed_at: DateTime<Utc>,
}

impl From<TrackedOrder> for TrackedOrderResponse {
    fn from(order: TrackedOrder) -> Self {
        Self {
            id: order.id,
            symbol: order.symbol,
            order_type: order.order_type,
            side: order.side.as_str().to_string(),
            placed_at: order.placed_at,
        }
    }
}

/// Place an order, optionally protected by SL/TP percentages.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    tag = "trading",
    request_body = PlaceOrderBody,
    responses(
        (status = 200, description = "Order attempted", body = OperationResponse),
        (status = 422, description = "Invalid order")
    )
)]
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PlaceOrderBody>, JsonRejection>,
) -> ApiResult<Json<OperationResponse>> {
    let Json(body) = payload?;
    body.validate()?;

    let request = PlaceOrderRequest::from(body);
    let placed = state.executor.place_order(&request).await;
    Ok(Json(OperationResponse::outcome(
        placed,
        format!("{} {} {} placed", request.side, request.amount, request.symbol),
        format!("Order for {} was not placed", request.symbol),
    )))
}

/// List orders placed through this service.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    tag = "trading",
    responses(
        (status = 200, description = "Tracked orders", body = Vec<TrackedOrderResponse>)
    )
)]
pub async fn list_orders(State(state): State<Arc<AppState>>) -> Json<Vec<TrackedOrderResponse>> {
    Json(
        state
            .executor
            .tracked_orders()
            .into_iter()
            .map(TrackedOrderResponse::from)
            .collect(),
    )
}

/// Cancel an order by id.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/cancel",
    tag = "trading",
    params(
        ("order_id" = String, Path, description = "Exchange order id")
    ),
    responses(
        (status = 200, description = "Cancel attempted", body = OperationResponse)
    )
)]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Json<OperationResponse> {
    let cancelled = state.executor.cancel_order(&order_id).await;
    Json(OperationResponse::outcome(
        cancelled,
        format!("Order {order_id} cancelled"),
        format!("Order {order_id} could not be cancelled"),
    ))
}
