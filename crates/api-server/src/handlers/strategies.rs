//! Strategy catalog and per-symbol bindings.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use risk_manager::{BindingInfo, Strategy, StrategyInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StrategyResponse {
    pub name: String,
    pub description: String,
    pub default_params: Value,
}

impl From<StrategyInfo> for StrategyResponse {
    fn from(info: StrategyInfo) -> Self {
        Self {
            name: info.name.to_string(),
            description: info.description,
            default_params: info.default_params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BindingResponse {
    pub symbol: String,
    pub strategy: String,
    pub description: String,
    pub params: Value,
    pub bound_at: DateTime<Utc>,
}

impl From<BindingInfo> for BindingResponse {
    fn from(info: BindingInfo) -> Self {
        Self {
            symbol: info.symbol,
            strategy: info.strategy.name().to_string(),
            description: info.description,
            params: info.params,
            bound_at: info.bound_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BindStrategyRequest {
    pub symbol: String,
    /// Strategy name as listed by the catalog.
    pub strategy: String,
    /// Overrides for the strategy's default parameters.
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UnbindQuery {
    pub symbol: String,
}

/// List every available strategy with its default parameters.
#[utoipa::path(
    get,
    path = "/api/v1/strategies",
    tag = "strategies",
    responses(
        (status = 200, description = "Strategy catalog", body = Vec<StrategyResponse>)
    )
)]
pub async fn list_strategies() -> Json<Vec<StrategyResponse>> {
    Json(
        Strategy::catalog()
            .into_iter()
            .map(StrategyResponse::from)
            .collect(),
    )
}

/// List strategy bindings.
#[utoipa::path(
    get,
    path = "/api/v1/strategies/bindings",
    tag = "strategies",
    responses(
        (status = 200, description = "Bound strategies", body = Vec<BindingResponse>)
    )
)]
pub async fn list_bindings(State(state): State<Arc<AppState>>) -> Json<Vec<BindingResponse>> {
    let bindings = state.engine.lock().await.bindings();
    Json(bindings.into_iter().map(BindingResponse::from).collect())
}

/// Bind a strategy to a symbol, replacing any existing binding.
#[utoipa::path(
    post,
    path = "/api/v1/strategies/bindings",
    tag = "strategies",
    request_body = BindStrategyRequest,
    responses(
        (status = 200, description = "Strategy bound", body = BindingResponse),
        (status = 400, description = "Unknown strategy or invalid parameters")
    )
)]
pub async fn bind_strategy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BindStrategyRequest>, JsonRejection>,
) -> ApiResult<Json<BindingResponse>> {
    let Json(request) = payload?;
    if request.symbol.trim().is_empty() {
        return Err(ApiError::Validation("symbol must not be empty".to_string()));
    }

    let mut engine = state.engine.lock().await;
    engine.bind(&request.symbol, &request.strategy, &request.params)?;
    let info = engine
        .bindings()
        .into_iter()
        .find(|b| b.symbol == request.symbol)
        .ok_or_else(|| ApiError::Internal("binding vanished after bind".to_string()))?;
    Ok(Json(BindingResponse::from(info)))
}

/// Remove the strategy bound to a symbol.
#[utoipa::path(
    delete,
    path = "/api/v1/strategies/bindings",
    tag = "strategies",
    params(UnbindQuery),
    responses(
        (status = 204, description = "Binding removed"),
        (status = 404, description = "Symbol has no binding")
    )
)]
pub async fn unbind_strategy(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UnbindQuery>, QueryRejection>,
) -> ApiResult<axum::http::StatusCode> {
    let Query(query) = query?;
    if state.engine.lock().await.unbind(&query.symbol) {
        Ok(axum::http::StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no strategy bound to {}", query.symbol)))
    }
}
