//! API route definitions.

use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{account, health, positions, risk, strategies, trading, OperationResponse};
use crate::state::AppState;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Futures Guard API",
        version = "1.0.0",
        description = "Position protection, stop-loss reaction strategies and order execution for margin futures"
    ),
    paths(
        health::health_check,
        health::readiness,
        positions::list_positions,
        positions::close_position,
        positions::close_all_positions,
        positions::partial_close,
        positions::set_position_sltp,
        trading::place_order,
        trading::list_orders,
        trading::cancel_order,
        account::get_position_mode,
        account::set_position_mode,
        account::set_leverage,
        strategies::list_strategies,
        strategies::list_bindings,
        strategies::bind_strategy,
        strategies::unbind_strategy,
        risk::get_strike_status,
        risk::reset_strikes,
    ),
    components(
        schemas(
            crate::error::ErrorResponse,
            OperationResponse,
            health::HealthResponse,
            positions::PositionResponse,
            positions::ClosePositionRequest,
            positions::PartialCloseRequest,
            positions::SetSlTpRequest,
            trading::PlaceOrderBody,
            trading::TrackedOrderResponse,
            account::PositionModeBody,
            account::LeverageRequest,
            strategies::StrategyResponse,
            strategies::BindingResponse,
            strategies::BindStrategyRequest,
            risk::StrikeEventResponse,
            risk::StrikeStatusResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "positions", description = "Open positions and their protection"),
        (name = "trading", description = "Order execution"),
        (name = "account", description = "Position mode and leverage"),
        (name = "strategies", description = "Strategy catalog and symbol bindings"),
        (name = "risk", description = "Three-strike circuit breaker"),
    )
)]
pub struct ApiDoc;

/// Create the main router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))

        // Position endpoints
        .route("/api/v1/positions", get(positions::list_positions))
        .route("/api/v1/positions/close", post(positions::close_position))
        .route("/api/v1/positions/close-all", post(positions::close_all_positions))
        .route("/api/v1/positions/partial-close", post(positions::partial_close))
        .route("/api/v1/positions/sltp", put(positions::set_position_sltp))

        // Trading endpoints
        .route("/api/v1/orders", get(trading::list_orders).post(trading::place_order))
        .route("/api/v1/orders/{order_id}/cancel", post(trading::cancel_order))

        // Account endpoints
        .route(
            "/api/v1/account/position-mode",
            get(account::get_position_mode).put(account::set_position_mode),
        )
        .route("/api/v1/account/leverage", post(account::set_leverage))

        // Strategy endpoints
        .route("/api/v1/strategies", get(strategies::list_strategies))
        .route(
            "/api/v1/strategies/bindings",
            get(strategies::list_bindings)
                .post(strategies::bind_strategy)
                .delete(strategies::unbind_strategy),
        )

        // Risk endpoints
        .route("/api/v1/risk/strikes", get(risk::get_strike_status))
        .route("/api/v1/risk/strikes/reset", post(risk::reset_strikes))

        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))

        // Add state
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use exchange_core::api::{ExchangeGateway, PaperExchange};
    use exchange_core::config::Config;
    use exchange_core::types::PositionSide;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BTC: &str = "BTC/USDT:USDT";

    fn test_state() -> (Arc<PaperExchange>, Arc<AppState>) {
        let paper = Arc::new(
            PaperExchange::new()
                .with_price(BTC, dec!(100))
                .with_position(BTC, PositionSide::Long, dec!(2), dec!(90)),
        );
        let mut config = Config::default();
        config.executor.settle_timeout_ms = 200;
        config.executor.settle_poll_ms = 10;
        let state = AppState::with_gateway(paper.clone(), &config);
        (paper, Arc::new(state))
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[test]
    fn test_openapi_spec() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().unwrap();
        assert!(json.contains("Futures Guard API"));
        assert!(json.contains("/api/v1/positions/sltp"));
        assert!(json.contains("/api/v1/risk/strikes"));
    }

    #[tokio::test]
    async fn test_list_positions() {
        let (_, state) = test_state();
        let (status, body) = send(create_router(state), "GET", "/api/v1/positions", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["symbol"], BTC);
        assert_eq!(body[0]["side"], "long");
    }

    #[tokio::test]
    async fn test_set_sltp_then_close() {
        let (paper, state) = test_state();
        let router = create_router(state);

        let (status, body) = send(
            router.clone(),
            "PUT",
            "/api/v1/positions/sltp",
            Some(json!({ "symbol": BTC, "stop_loss": "85", "take_profit": "120" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(paper.fetch_open_orders(Some(BTC)).await.unwrap().len(), 2);

        let (_, body) = send(
            router.clone(),
            "POST",
            "/api/v1/positions/close",
            Some(json!({ "symbol": BTC })),
        )
        .await;
        assert_eq!(body["success"], true);

        let (_, body) = send(router, "POST", "/api/v1/positions/close", Some(json!({ "symbol": BTC }))).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_invalid_order_is_rejected_before_execution() {
        let (paper, state) = test_state();
        let (status, body) = send(
            create_router(state),
            "POST",
            "/api/v1/orders",
            Some(json!({ "symbol": BTC, "side": "buy", "order_type": "limit", "amount": "1" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(paper.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let (_, state) = test_state();
        let (status, body) = send(
            create_router(state),
            "POST",
            "/api/v1/orders",
            Some(json!({ "symbol": BTC })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_JSON");
    }

    #[tokio::test]
    async fn test_strategy_binding_lifecycle() {
        let (_, state) = test_state();
        let router = create_router(state);

        let (status, catalog) = send(router.clone(), "GET", "/api/v1/strategies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(catalog.as_array().unwrap().len(), 4);

        let (status, bound) = send(
            router.clone(),
            "POST",
            "/api/v1/strategies/bindings",
            Some(json!({ "symbol": BTC, "strategy": "MarketReversalStrategy", "params": { "reversal_percentage": 3 } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bound["strategy"], "MarketReversalStrategy");

        let (status, body) = send(
            router.clone(),
            "POST",
            "/api/v1/strategies/bindings",
            Some(json!({ "symbol": BTC, "strategy": "Martingale" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "UNKNOWN_STRATEGY");

        let uri = "/api/v1/strategies/bindings?symbol=BTC%2FUSDT%3AUSDT";
        let (status, _) = send(router.clone(), "DELETE", uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(router, "DELETE", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_strike_status_and_reset() {
        let (_, state) = test_state();
        let router = create_router(state);

        let (status, body) = send(router.clone(), "GET", "/api/v1/risk/strikes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["limit"], 3);
        assert_eq!(body["tripped"], false);

        let (status, body) = send(router, "POST", "/api/v1/risk/strikes/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_position_mode_round_trip() {
        let (_, state) = test_state();
        let router = create_router(state);

        let (_, body) = send(router.clone(), "GET", "/api/v1/account/position-mode", None).await;
        assert_eq!(body["hedge_mode"], false);

        let (_, body) = send(
            router,
            "PUT",
            "/api/v1/account/position-mode",
            Some(json!({ "hedge_mode": false })),
        )
        .await;
        assert_eq!(body["success"], true);
    }
}
