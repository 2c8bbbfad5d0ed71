//! Stop-loss and take-profit placement through an ordered fallback chain.
//!
//! Venues disagree on how conditional orders are spelled, so placement
//! walks a fixed list of spellings and stops at the first one accepted.
//! The order of [`Attempt::CHAIN`] is significant and must not change.

use exchange_core::api::ExchangeGateway;
use exchange_core::types::{
    market_id, order_type, ExchangeOrder, OrderParams, OrderRequest, OrderSide, PositionMode,
    PositionSide, PositionSideTag,
};
use exchange_core::GatewayError;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalKind {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ConditionalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StopLoss => "stop-loss",
            Self::TakeProfit => "take-profit",
        })
    }
}

/// One spelling in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attempt {
    /// `market` with a trigger price parameter.
    GenericMarket,
    /// `STOP_MARKET` / `TAKE_PROFIT_MARKET`.
    TriggerMarket,
    /// `STOP` / `TAKE_PROFIT`, the limit-style variants.
    TriggerLimit,
    /// Raw parameters sent to the low-level order endpoint.
    Direct,
}

impl Attempt {
    pub const CHAIN: [Attempt; 4] = [
        Self::GenericMarket,
        Self::TriggerMarket,
        Self::TriggerLimit,
        Self::Direct,
    ];
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GenericMarket => "generic_market",
            Self::TriggerMarket => "trigger_market",
            Self::TriggerLimit => "trigger_limit",
            Self::Direct => "direct",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub attempt: Attempt,
    pub reason: String,
}

/// Every spelling was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("all {} conditional order attempts failed: {}", .attempts.len(), summarize(.attempts))]
pub struct FallbackFailure {
    pub attempts: Vec<AttemptFailure>,
}

fn summarize(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|failure| format!("{}: {}", failure.attempt, failure.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct PlacedConditional {
    pub order: ExchangeOrder,
    pub attempt: Attempt,
    /// Attempts rejected before the accepted one.
    pub failures: Vec<AttemptFailure>,
}

/// A protective order for an existing position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalOrder {
    pub symbol: String,
    pub kind: ConditionalKind,
    /// Side of the position being protected.
    pub position_side: PositionSide,
    pub amount: Decimal,
    pub trigger_price: Decimal,
    pub mode: PositionMode,
}

impl ConditionalOrder {
    pub fn close_side(&self) -> OrderSide {
        self.position_side.closing_side()
    }

    /// Order parameters honoring the hedge-mode pairing: `positionSide`
    /// without `reduceOnly` in hedge mode, `reduceOnly` otherwise.
    pub fn params(&self) -> OrderParams {
        let mut params = OrderParams {
            stop_price: Some(self.trigger_price),
            close_position: Some(true),
            ..Default::default()
        };
        if self.mode.is_hedge() {
            params.position_side = Some(PositionSideTag::from(self.position_side));
        } else {
            params.reduce_only = Some(true);
        }
        params
    }

    /// Request for the `create_order` based attempts.
    pub fn request(&self, attempt: Attempt) -> OrderRequest {
        let (order_type, price) = match (attempt, self.kind) {
            (Attempt::GenericMarket, _) => (order_type::MARKET, None),
            (Attempt::TriggerMarket, ConditionalKind::StopLoss) => (order_type::STOP_MARKET, None),
            (Attempt::TriggerMarket, ConditionalKind::TakeProfit) => {
                (order_type::TAKE_PROFIT_MARKET, None)
            }
            (Attempt::TriggerLimit, ConditionalKind::StopLoss) => (order_type::STOP, None),
            (Attempt::TriggerLimit, ConditionalKind::TakeProfit) => {
                (order_type::TAKE_PROFIT, Some(self.trigger_price))
            }
            (Attempt::Direct, ConditionalKind::StopLoss) => (order_type::STOP_MARKET, None),
            (Attempt::Direct, ConditionalKind::TakeProfit) => {
                (order_type::TAKE_PROFIT_MARKET, None)
            }
        };

        let request = OrderRequest::new(self.symbol.clone(), order_type, self.close_side(), self.amount)
            .with_params(self.params());
        match price {
            Some(price) => request.with_price(price),
            None => request,
        }
    }

    /// Parameters for the low-level endpoint.
    pub fn direct_params(&self) -> BTreeMap<String, String> {
        let order_type = match self.kind {
            ConditionalKind::StopLoss => order_type::STOP_MARKET,
            ConditionalKind::TakeProfit => order_type::TAKE_PROFIT_MARKET,
        };

        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), market_id(&self.symbol));
        params.insert("side".to_string(), self.close_side().as_wire().to_string());
        params.insert("type".to_string(), order_type.to_string());
        params.insert("stopPrice".to_string(), self.trigger_price.to_string());
        params.insert("quantity".to_string(), self.amount.to_string());
        params.insert("timeInForce".to_string(), "GTC".to_string());
        params.insert("closePosition".to_string(), "true".to_string());
        if self.mode.is_hedge() {
            params.insert(
                "positionSide".to_string(),
                PositionSideTag::from(self.position_side).as_str().to_string(),
            );
        } else {
            params.insert("reduceOnly".to_string(), "true".to_string());
        }
        params
    }
}

/// Walks [`Attempt::CHAIN`] until one spelling is accepted.
pub async fn place_conditional(
    gateway: &dyn ExchangeGateway,
    order: &ConditionalOrder,
) -> Result<PlacedConditional, FallbackFailure> {
    let mut failures = Vec::new();

    for attempt in Attempt::CHAIN {
        let result: Result<ExchangeOrder, GatewayError> = match attempt {
            Attempt::Direct => gateway.submit_direct_order(&order.direct_params()).await,
            _ => gateway.create_order(&order.request(attempt)).await,
        };

        match result {
            Ok(placed) => {
                info!(
                    symbol = %order.symbol,
                    kind = %order.kind,
                    attempt = %attempt,
                    trigger = %order.trigger_price,
                    order_id = %placed.id,
                    "Conditional order placed"
                );
                return Ok(PlacedConditional {
                    order: placed,
                    attempt,
                    failures,
                });
            }
            Err(e) => {
                warn!(
                    symbol = %order.symbol,
                    kind = %order.kind,
                    attempt = %attempt,
                    error = %e,
                    "Conditional order attempt rejected"
                );
                failures.push(AttemptFailure {
                    attempt,
                    reason: e.to_string(),
                });
            }
        }
    }

    let failure = FallbackFailure { attempts: failures };
    error!(symbol = %order.symbol, kind = %order.kind, error = %failure, "Conditional order placement failed");
    Err(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use exchange_core::types::{ExchangePosition, Ticker};
    use exchange_core::GatewayResult;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create(OrderRequest),
        Direct(BTreeMap<String, String>),
    }

    /// Answers `create_order` and `submit_direct_order` from scripted
    /// outcomes, in order, and records every call.
    struct ScriptedGateway {
        create_outcomes: Mutex<VecDeque<GatewayResult<ExchangeOrder>>>,
        direct_outcome: Mutex<Option<GatewayResult<ExchangeOrder>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedGateway {
        fn new(
            create: impl IntoIterator<Item = GatewayResult<ExchangeOrder>>,
            direct: GatewayResult<ExchangeOrder>,
        ) -> Self {
            Self {
                create_outcomes: Mutex::new(create.into_iter().collect()),
                direct_outcome: Mutex::new(Some(direct)),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeGateway for ScriptedGateway {
        async fn fetch_ticker(&self, symbol: &str) -> GatewayResult<Ticker> {
            Err(GatewayError::Unsupported(format!("ticker {symbol}")))
        }

        async fn fetch_positions(&self, _symbols: &[String]) -> GatewayResult<Vec<ExchangePosition>> {
            Ok(Vec::new())
        }

        async fn fetch_open_orders(&self, _symbol: Option<&str>) -> GatewayResult<Vec<ExchangeOrder>> {
            Ok(Vec::new())
        }

        async fn create_order(&self, request: &OrderRequest) -> GatewayResult<ExchangeOrder> {
            self.calls.lock().unwrap().push(Call::Create(request.clone()));
            self.create_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Unsupported("unscripted create_order".to_string())))
        }

        async fn submit_direct_order(
            &self,
            params: &BTreeMap<String, String>,
        ) -> GatewayResult<ExchangeOrder> {
            self.calls.lock().unwrap().push(Call::Direct(params.clone()));
            self.direct_outcome
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(GatewayError::Unsupported("unscripted direct order".to_string())))
        }

        async fn cancel_order(&self, order_id: &str, _symbol: &str) -> GatewayResult<()> {
            Err(GatewayError::NotFound(order_id.to_string()))
        }

        async fn set_leverage(&self, _leverage: u32, _symbol: &str) -> GatewayResult<()> {
            Ok(())
        }

        async fn position_mode(&self) -> GatewayResult<PositionMode> {
            Ok(PositionMode::OneWay)
        }

        async fn set_position_mode(&self, _mode: PositionMode) -> GatewayResult<()> {
            Ok(())
        }
    }

    fn accepted(order_type: &str) -> GatewayResult<ExchangeOrder> {
        Ok(ExchangeOrder {
            id: "42".to_string(),
            symbol: "BTC/USDT:USDT".to_string(),
            order_type: order_type.to_string(),
            side: OrderSide::Sell,
            amount: dec!(1),
            price: None,
            stop_price: Some(dec!(95)),
            trigger_price: None,
            info: HashMap::new(),
            timestamp: Utc::now(),
        })
    }

    fn stop_loss(mode: PositionMode) -> ConditionalOrder {
        ConditionalOrder {
            symbol: "BTC/USDT:USDT".to_string(),
            kind: ConditionalKind::StopLoss,
            position_side: PositionSide::Long,
            amount: dec!(1),
            trigger_price: dec!(95),
            mode,
        }
    }

    fn rejected() -> GatewayResult<ExchangeOrder> {
        Err(GatewayError::rejected(-1116, "Invalid orderType."))
    }

    #[tokio::test]
    async fn test_direct_call_after_three_rejections() {
        let gateway = ScriptedGateway::new(
            [rejected(), rejected(), rejected()],
            accepted("STOP_MARKET"),
        );

        let placed = place_conditional(&gateway, &stop_loss(PositionMode::OneWay))
            .await
            .unwrap();
        assert_eq!(placed.attempt, Attempt::Direct);
        assert_eq!(placed.failures.len(), 3);

        let calls = gateway.calls();
        assert_eq!(calls.len(), 4);
        let create_types: Vec<&str> = calls
            .iter()
            .filter_map(|call| match call {
                Call::Create(request) => Some(request.order_type.as_str()),
                Call::Direct(_) => None,
            })
            .collect();
        assert_eq!(create_types, ["market", "STOP_MARKET", "STOP"]);

        let Call::Direct(params) = &calls[3] else {
            panic!("last attempt should be the direct call, got {:?}", calls[3]);
        };
        assert_eq!(params["symbol"], "BTCUSDT");
        assert_eq!(params["side"], "SELL");
        assert_eq!(params["type"], "STOP_MARKET");
        assert_eq!(params["reduceOnly"], "true");
        assert!(!params.contains_key("positionSide"));
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let gateway = ScriptedGateway::new([accepted("stop_market")], accepted("STOP_MARKET"));

        let placed = place_conditional(&gateway, &stop_loss(PositionMode::OneWay))
            .await
            .unwrap();
        assert_eq!(placed.attempt, Attempt::GenericMarket);
        assert!(placed.failures.is_empty());
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_reports_every_reason() {
        let gateway = ScriptedGateway::new(
            [rejected(), rejected(), rejected()],
            Err(GatewayError::Network("connection reset".to_string())),
        );

        let failure = place_conditional(&gateway, &stop_loss(PositionMode::OneWay))
            .await
            .unwrap_err();
        let attempts: Vec<_> = failure.attempts.iter().map(|f| f.attempt).collect();
        assert_eq!(attempts, Attempt::CHAIN.to_vec());
        assert!(failure.attempts[3].reason.contains("connection reset"));
        assert_eq!(gateway.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_hedge_mode_attempts_never_send_reduce_only() {
        let gateway = ScriptedGateway::new(
            [rejected(), rejected(), rejected()],
            accepted("STOP_MARKET"),
        );

        place_conditional(&gateway, &stop_loss(PositionMode::Hedge))
            .await
            .unwrap();

        for call in gateway.calls() {
            match call {
                Call::Create(request) => {
                    assert_eq!(request.params.reduce_only, None);
                    assert_eq!(request.params.position_side, Some(PositionSideTag::Long));
                    assert_eq!(request.params.close_position, Some(true));
                }
                Call::Direct(params) => {
                    assert!(!params.contains_key("reduceOnly"));
                    assert_eq!(params["positionSide"], "LONG");
                    assert_eq!(params["closePosition"], "true");
                }
            }
        }
    }

    #[test]
    fn test_take_profit_spellings() {
        let order = ConditionalOrder {
            kind: ConditionalKind::TakeProfit,
            trigger_price: dec!(110),
            ..stop_loss(PositionMode::OneWay)
        };

        assert_eq!(order.request(Attempt::GenericMarket).order_type, "market");
        assert_eq!(order.request(Attempt::TriggerMarket).order_type, "TAKE_PROFIT_MARKET");

        let limit = order.request(Attempt::TriggerLimit);
        assert_eq!(limit.order_type, "TAKE_PROFIT");
        assert_eq!(limit.price, Some(dec!(110)));
        assert_eq!(limit.params.stop_price, Some(dec!(110)));

        assert_eq!(order.direct_params()["type"], "TAKE_PROFIT_MARKET");
    }
}
