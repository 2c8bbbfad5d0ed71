//! Strategy engine: the always-on breaker plus per-symbol bindings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::circuit_breaker::{StrikeStatus, ThreeStrike};
use crate::context::{Action, Context};
use crate::strategy::{Strategy, StrategyKind};
use crate::tracking::Tracking;
use crate::Result;

/// A user-selected strategy bound to one symbol, with its own memory.
#[derive(Debug, Clone)]
pub struct Binding {
    pub strategy: Strategy,
    pub tracking: Tracking,
    pub bound_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingInfo {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub description: String,
    pub params: Value,
    pub bound_at: DateTime<Utc>,
}

/// Owns every strategy instance and its tracking arena.
///
/// Not safe for concurrent mutation; callers serialize access (the service
/// keeps it behind a single mutex).
#[derive(Debug)]
pub struct StrategyEngine {
    breaker: ThreeStrike,
    breaker_tracking: Tracking,
    bindings: HashMap<String, Binding>,
}

impl Default for StrategyEngine {
    fn default() -> Self {
        Self::new(ThreeStrike::default())
    }
}

impl StrategyEngine {
    pub fn new(breaker: ThreeStrike) -> Self {
        Self {
            breaker,
            breaker_tracking: Tracking::new(),
            bindings: HashMap::new(),
        }
    }

    /// Binds a strategy to `symbol`, replacing any previous binding and
    /// discarding its memory.
    pub fn bind(&mut self, symbol: &str, strategy: &str, params: &Value) -> Result<&Binding> {
        let strategy = Strategy::from_params(strategy.parse::<StrategyKind>()?, params)?;
        info!(symbol, strategy = strategy.name(), "Strategy bound");
        self.bindings.insert(
            symbol.to_string(),
            Binding {
                strategy,
                tracking: Tracking::new(),
                bound_at: Utc::now(),
            },
        );
        Ok(&self.bindings[symbol])
    }

    pub fn unbind(&mut self, symbol: &str) -> bool {
        let removed = self.bindings.remove(symbol).is_some();
        if removed {
            info!(symbol, "Strategy unbound");
        }
        removed
    }

    pub fn binding(&self, symbol: &str) -> Option<&Binding> {
        self.bindings.get(symbol)
    }

    pub fn bindings(&self) -> Vec<BindingInfo> {
        let mut list: Vec<BindingInfo> = self
            .bindings
            .iter()
            .map(|(symbol, binding)| BindingInfo {
                symbol: symbol.clone(),
                strategy: binding.strategy.kind(),
                description: binding.strategy.description(),
                params: binding.strategy.params(),
                bound_at: binding.bound_at,
            })
            .collect();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        list
    }

    pub fn bound_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.bindings.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Evaluates the global breaker. Must run before [`Self::evaluate_bound`]
    /// for the same context; a returned action preempts everything else.
    pub fn evaluate_breaker(&mut self, ctx: &mut Context) -> Option<Action> {
        if self.breaker.should_execute(ctx, &mut self.breaker_tracking) {
            self.breaker.execute(ctx, &self.breaker_tracking)
        } else {
            None
        }
    }

    /// Evaluates the strategy bound to the context's symbol, if any.
    pub fn evaluate_bound(&mut self, ctx: &mut Context) -> Option<Action> {
        let binding = self.bindings.get_mut(&ctx.symbol)?;
        let action = binding.strategy.evaluate(ctx, &mut binding.tracking);
        if let Some(action) = &action {
            debug!(
                symbol = %ctx.symbol,
                strategy = binding.strategy.name(),
                action = action.kind(),
                "Bound strategy produced action"
            );
        }
        action
    }

    pub fn strike_status(&self, now: DateTime<Utc>) -> StrikeStatus {
        self.breaker.status(&self.breaker_tracking, now)
    }

    pub fn reset_strikes(&mut self) {
        info!(cleared = self.breaker_tracking.strikes.len(), "Strike record reset");
        self.breaker_tracking.strikes.clear();
    }

    pub fn breaker(&self) -> &ThreeStrike {
        &self.breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use exchange_core::types::{OrderSide, Position, PositionSide};
    use rust_decimal_macros::dec;
    use serde_json::json;

    const BTC: &str = "BTC/USDT:USDT";

    fn stop_hit(symbol: &str) -> Context {
        let mut position = Position::new(symbol, PositionSide::Long, dec!(1), dec!(100));
        position.last_price = Some(dec!(95));
        Context::new(symbol, Some(position), Utc::now()).with_stop_loss_hit()
    }

    #[test]
    fn test_bind_and_unbind() {
        let mut engine = StrategyEngine::default();
        engine
            .bind(BTC, "StopAndReverseStrategy", &json!({ "tp_percentage": 3 }))
            .unwrap();
        assert_eq!(engine.bound_symbols(), vec![BTC.to_string()]);
        assert_eq!(engine.bindings()[0].strategy, StrategyKind::StopAndReverse);

        assert!(engine.unbind(BTC));
        assert!(!engine.unbind(BTC));
        assert!(engine.bindings().is_empty());
    }

    #[test]
    fn test_bind_unknown_strategy() {
        let mut engine = StrategyEngine::default();
        let err = engine.bind(BTC, "Grid", &json!({})).unwrap_err();
        assert!(matches!(err, EngineError::UnknownStrategy(name) if name == "Grid"));
    }

    #[test]
    fn test_breaker_then_bound_strategy() {
        let mut engine = StrategyEngine::default();
        engine.bind(BTC, "StopAndReverseStrategy", &Value::Null).unwrap();

        let mut ctx = stop_hit(BTC);
        assert!(engine.evaluate_breaker(&mut ctx).is_none());
        match engine.evaluate_bound(&mut ctx) {
            Some(Action::PlaceOrderWithTakeProfit { side, take_profit_price, .. }) => {
                assert_eq!(side, OrderSide::Sell);
                assert_eq!(take_profit_price, dec!(93.1));
            }
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(engine.strike_status(Utc::now()).count, 1);
    }

    #[test]
    fn test_breaker_counts_across_symbols() {
        let mut engine = StrategyEngine::default();
        for symbol in ["BTC/USDT:USDT", "ETH/USDT:USDT"] {
            assert!(engine.evaluate_breaker(&mut stop_hit(symbol)).is_none());
        }
        assert!(matches!(
            engine.evaluate_breaker(&mut stop_hit("SOL/USDT:USDT")),
            Some(Action::CloseAllPositions { .. })
        ));

        engine.reset_strikes();
        assert_eq!(engine.strike_status(Utc::now()).count, 0);
    }

    #[test]
    fn test_rebinding_discards_memory() {
        let mut engine = StrategyEngine::default();
        engine.bind(BTC, "MarketReversalStrategy", &Value::Null).unwrap();
        assert!(engine.evaluate_bound(&mut stop_hit(BTC)).is_none());
        assert!(!engine.binding(BTC).unwrap().tracking.is_empty());

        engine.bind(BTC, "MarketReversalStrategy", &Value::Null).unwrap();
        assert!(engine.binding(BTC).unwrap().tracking.is_empty());
    }

    #[test]
    fn test_unbound_symbol_has_no_action() {
        let mut engine = StrategyEngine::default();
        assert!(engine.evaluate_bound(&mut stop_hit(BTC)).is_none());
    }
}
