//! Application state shared across handlers.

use exchange_core::api::{ExchangeGateway, GuardedGateway, PaperExchange};
use exchange_core::config::Config;
use exchange_core::types::PositionMode;
use risk_manager::{StrategyEngine, ThreeStrike};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use trading_engine::{ExecutorConfig, OrderExecutor};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Order execution engine.
    pub executor: Arc<OrderExecutor>,
    /// Strategy bindings and the circuit breaker. The reconciler and the
    /// handlers serialize access through this lock.
    pub engine: Arc<Mutex<StrategyEngine>>,
}

impl AppState {
    pub fn new(executor: Arc<OrderExecutor>, engine: Arc<Mutex<StrategyEngine>>) -> Self {
        Self { executor, engine }
    }

    /// Builds state over `gateway` with executor and breaker settings taken
    /// from `config`.
    pub fn with_gateway(gateway: Arc<dyn ExchangeGateway>, config: &Config) -> Self {
        let executor = OrderExecutor::new(gateway, ExecutorConfig::from(&config.executor));
        let breaker = ThreeStrike::new(
            config.reconciler.strike_limit,
            chrono::Duration::seconds(config.reconciler.strike_window_secs),
        );
        Self::new(
            Arc::new(executor),
            Arc::new(Mutex::new(StrategyEngine::new(breaker))),
        )
    }

    /// Paper exchange seeded from the `[paper]` section, guarded by the
    /// configured call timeout.
    pub fn paper_gateway(config: &Config) -> Arc<dyn ExchangeGateway> {
        let mut paper = PaperExchange::new()
            .with_mode(PositionMode::from_hedge(config.paper.hedge_mode));
        for market in &config.paper.markets {
            paper = paper.with_price(market.symbol.clone(), market.price);
        }
        info!(
            markets = config.paper.markets.len(),
            hedge_mode = config.paper.hedge_mode,
            "Paper exchange initialized"
        );

        Arc::new(GuardedGateway::new(
            Arc::new(paper),
            config.gateway.call_timeout(),
        ))
    }
}
