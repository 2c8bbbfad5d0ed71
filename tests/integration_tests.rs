//! Integration tests for component interactions.
//!
//! These tests drive the reader, strategy engine, executor and reconciler
//! together against the paper exchange.

use api_server::{Reconciler, ReconcilerConfig};
use chrono::{Duration as ChronoDuration, Utc};
use exchange_core::api::{ExchangeGateway, GuardedGateway, PaperExchange};
use exchange_core::types::{OrderSide, Position, PositionMode, PositionSide};
use risk_manager::{Action, Context, StrategyEngine, ThreeStrike};
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use trading_engine::{ExecutorConfig, OrderExecutor, PlaceOrderRequest};

const BTC: &str = "BTC/USDT:USDT";
const ETH: &str = "ETH/USDT:USDT";

fn executor_over(paper: &Arc<PaperExchange>) -> Arc<OrderExecutor> {
    let guarded = GuardedGateway::new(paper.clone(), Duration::from_secs(1));
    Arc::new(OrderExecutor::new(
        Arc::new(guarded),
        ExecutorConfig {
            settle_timeout: Duration::from_millis(300),
            settle_poll: Duration::from_millis(10),
            default_leverage: Some(5),
        },
    ))
}

fn reconciler(
    executor: &Arc<OrderExecutor>,
    engine: &Arc<Mutex<StrategyEngine>>,
) -> (Reconciler, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let reconciler = Reconciler::new(
        ReconcilerConfig {
            interval: Duration::from_millis(10),
        },
        executor.clone(),
        engine.clone(),
        rx,
    );
    (reconciler, tx)
}

/// Partial profits are taken on the way up and the trailing stop closes
/// the remainder.
#[tokio::test]
async fn test_trailing_stop_with_partial_profits_end_to_end() {
    let paper = Arc::new(
        PaperExchange::new()
            .with_price(BTC, dec!(100))
            .with_position(BTC, PositionSide::Long, dec!(10), dec!(100)),
    );
    let executor = executor_over(&paper);
    let engine = Arc::new(Mutex::new(StrategyEngine::default()));
    engine
        .lock()
        .await
        .bind(BTC, "TrailingStopWithPartialProfits", &Value::Null)
        .unwrap();
    let (mut reconciler, _tx) = reconciler(&executor, &engine);

    assert_eq!(reconciler.tick().await.actions_executed, 0);

    paper.set_price(BTC, dec!(105)).await;
    assert_eq!(reconciler.tick().await.actions_executed, 1);
    assert_eq!(executor.get_open_positions().await.unwrap()[0].size, dec!(8));

    // Same level is not taken twice.
    assert_eq!(reconciler.tick().await.actions_executed, 0);

    paper.set_price(BTC, dec!(110)).await;
    assert_eq!(reconciler.tick().await.actions_executed, 1);
    assert_eq!(executor.get_open_positions().await.unwrap()[0].size, dec!(5.6));

    paper.set_price(BTC, dec!(108.9)).await;
    assert_eq!(reconciler.tick().await.actions_executed, 1);
    assert!(executor.get_open_positions().await.unwrap().is_empty());
}

/// An entry with percentage protection in hedge mode: every order carries
/// a position side and none carries reduce-only.
#[tokio::test]
async fn test_hedge_mode_entry_protection_and_stop_out() {
    let paper = Arc::new(
        PaperExchange::new()
            .with_price(ETH, dec!(2000))
            .with_mode(PositionMode::Hedge),
    );
    let executor = executor_over(&paper);
    let engine = Arc::new(Mutex::new(StrategyEngine::default()));
    let (mut reconciler, _tx) = reconciler(&executor, &engine);

    let request = PlaceOrderRequest {
        stop_loss_pct: Some(dec!(2.5)),
        take_profit_pct: Some(dec!(5)),
        ..PlaceOrderRequest::market(ETH, OrderSide::Sell, dec!(3))
    };
    assert!(executor.place_order(&request).await);
    assert_eq!(paper.leverage(ETH).await, Some(5));

    let position = &executor.get_open_positions().await.unwrap()[0];
    assert_eq!(position.side, PositionSide::Short);
    assert_eq!(position.stop_loss_price, Some(dec!(2050)));
    assert_eq!(position.take_profit_price, Some(dec!(1900)));

    reconciler.tick().await;
    paper.set_price(ETH, dec!(2060)).await;
    let report = reconciler.tick().await;
    assert_eq!(report.stop_loss_fills, 1);
    assert_eq!(engine.lock().await.strike_status(Utc::now()).count, 1);

    for order in paper.submitted().await {
        assert_eq!(order.params.reduce_only, None);
        assert!(order.params.position_side.is_some());
    }
}

/// The breaker window excludes a strike exactly `time_window` old and
/// includes one just inside it.
#[test]
fn test_breaker_window_boundary() {
    let start = Utc::now();
    let stop_at = |symbol: &str, offset: ChronoDuration| {
        let mut position = Position::new(symbol, PositionSide::Long, dec!(1), dec!(100));
        position.last_price = Some(dec!(95));
        Context::new(symbol, Some(position), start + offset).with_stop_loss_hit()
    };

    let mut engine = StrategyEngine::new(ThreeStrike::new(3, ChronoDuration::hours(4)));
    assert!(engine.evaluate_breaker(&mut stop_at("A", ChronoDuration::zero())).is_none());
    assert!(engine.evaluate_breaker(&mut stop_at("B", ChronoDuration::hours(1))).is_none());
    assert!(engine.evaluate_breaker(&mut stop_at("C", ChronoDuration::hours(4))).is_none());

    let mut engine = StrategyEngine::new(ThreeStrike::new(3, ChronoDuration::hours(4)));
    engine.evaluate_breaker(&mut stop_at("A", ChronoDuration::zero()));
    engine.evaluate_breaker(&mut stop_at("B", ChronoDuration::hours(1)));
    let inside = ChronoDuration::hours(4) - ChronoDuration::seconds(1);
    assert!(matches!(
        engine.evaluate_breaker(&mut stop_at("C", inside)),
        Some(Action::CloseAllPositions { .. })
    ));
}

/// A failing gateway degrades every operation to "no action" without
/// panicking.
#[tokio::test]
async fn test_failures_degrade_to_false() {
    let paper = Arc::new(
        PaperExchange::new()
            .with_price(BTC, dec!(100))
            .with_position(BTC, PositionSide::Long, dec!(1), dec!(100)),
    );
    paper.fail_symbol(BTC).await;
    paper.reject_direct_orders().await;
    for order_type in ["market", "STOP_MARKET", "STOP"] {
        paper.reject_order_type(order_type).await;
    }
    let executor = executor_over(&paper);

    assert!(!executor.close_position(BTC).await);
    assert!(!executor.close_all_positions().await);
    assert!(!executor.set_position_sltp(BTC, Some(dec!(90)), None).await);
    assert!(!executor.cancel_order("missing").await);
    assert_eq!(paper.direct_submitted().await.len(), 1);

    // Nothing was closed.
    assert_eq!(paper.fetch_positions(&[]).await.unwrap().len(), 1);
}
