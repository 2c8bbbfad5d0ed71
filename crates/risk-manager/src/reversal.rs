//! Strategies that re-enter in the opposite direction after a stop-loss.

use chrono::{DateTime, Utc};
use exchange_core::types::{OrderKind, OrderSide, PositionSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::{Action, Context};
use crate::tracking::Tracking;

/// A stop-loss exit remembered until the market reverses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppedPosition {
    pub side: PositionSide,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl StoppedPosition {
    /// Move from the exit price back in the original direction, in percent.
    fn reversal_pct(&self, price: Decimal) -> Option<Decimal> {
        let ratio = match self.side {
            PositionSide::Long => price.checked_div(self.exit_price)?,
            PositionSide::Short => self.exit_price.checked_div(price)?,
        };
        Some((ratio - Decimal::ONE) * Decimal::ONE_HUNDRED)
    }
}

/// Tracks a stop-loss exit and takes the reverse side once price has moved
/// `reversal_percentage` back from the exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketReversal {
    pub reversal_percentage: Decimal,
}

impl Default for MarketReversal {
    fn default() -> Self {
        Self {
            reversal_percentage: Decimal::new(20, 1),
        }
    }
}

impl MarketReversal {
    pub fn description(&self) -> String {
        format!(
            "Takes reverse position if market reverses by {}% after hitting stop loss",
            self.reversal_percentage.normalize()
        )
    }

    pub fn should_execute(&self, ctx: &Context, tracking: &mut Tracking) -> bool {
        if ctx.stop_loss_hit {
            let exit = ctx.position.as_ref().and_then(|position| {
                ctx.price()
                    .or(position.stop_loss_price)
                    .map(|exit_price| StoppedPosition {
                        side: position.side,
                        exit_price,
                        size: position.size,
                        timestamp: ctx.now,
                    })
            });
            if let Some(stopped) = exit {
                debug!(symbol = %ctx.symbol, exit_price = %stopped.exit_price, "Tracking stop-loss exit for reversal");
                tracking.stopped.insert(ctx.symbol.clone(), stopped);
            }
            return false;
        }

        let Some(stopped) = tracking.stopped.get(&ctx.symbol) else {
            return false;
        };
        let Some(price) = ctx.current_price else {
            return false;
        };
        stopped
            .reversal_pct(price)
            .is_some_and(|pct| pct >= self.reversal_percentage)
    }

    pub fn execute(&self, ctx: &Context, tracking: &mut Tracking) -> Option<Action> {
        let stopped = tracking.stopped.remove(&ctx.symbol)?;
        info!(symbol = %ctx.symbol, side = %stopped.side, "Market reversal confirmed");

        Some(Action::PlaceOrder {
            symbol: ctx.symbol.clone(),
            side: stopped.side.closing_side(),
            order_type: OrderKind::Market,
            amount: stopped.size,
            comment: "Market reversal strategy".to_string(),
        })
    }
}

/// Opens the opposite side immediately after a stop-loss, with a
/// take-profit `tp_percentage` away from the exit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopAndReverse {
    pub tp_percentage: Decimal,
}

impl Default for StopAndReverse {
    fn default() -> Self {
        Self {
            tp_percentage: Decimal::new(20, 1),
        }
    }
}

impl StopAndReverse {
    pub fn description(&self) -> String {
        format!(
            "Opens a reverse position when SL is hit with {}% TP target",
            self.tp_percentage.normalize()
        )
    }

    pub fn should_execute(&self, ctx: &Context, _tracking: &mut Tracking) -> bool {
        ctx.stop_loss_hit && ctx.position.is_some()
    }

    pub fn execute(&self, ctx: &Context, _tracking: &mut Tracking) -> Option<Action> {
        let position = ctx.position.as_ref()?;
        let exit_price = ctx.price()?;

        let side = position.side.closing_side();
        let offset = self.tp_percentage / Decimal::ONE_HUNDRED;
        let take_profit_price = match side {
            OrderSide::Sell => exit_price * (Decimal::ONE - offset),
            OrderSide::Buy => exit_price * (Decimal::ONE + offset),
        };
        info!(
            symbol = %ctx.symbol,
            side = %side,
            exit_price = %exit_price,
            take_profit = %take_profit_price,
            "Stop and reverse"
        );

        Some(Action::PlaceOrderWithTakeProfit {
            symbol: ctx.symbol.clone(),
            side,
            order_type: OrderKind::Market,
            amount: position.size,
            take_profit_price,
            comment: format!("Stop and Reverse with {}% TP", self.tp_percentage.normalize()),
        })
    }
}
