//! Evaluation context and the actions strategies produce.

use chrono::{DateTime, Utc};
use exchange_core::types::{OrderKind, OrderSide, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-evaluation input for one symbol.
///
/// Owned by a single evaluation; never shared across symbols or ticks.
#[derive(Debug, Clone)]
pub struct Context {
    pub symbol: String,
    pub position: Option<Position>,
    /// Set by the caller exactly once per detected stop-loss fill.
    pub stop_loss_hit: bool,
    pub now: DateTime<Utc>,
    /// Latest traded price, fetched by the caller.
    pub current_price: Option<Decimal>,
    pub trailing_stop_hit: bool,
    pub partial_profit: Option<Action>,
}

impl Context {
    pub fn new(symbol: impl Into<String>, position: Option<Position>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            position,
            stop_loss_hit: false,
            now,
            current_price: None,
            trailing_stop_hit: false,
            partial_profit: None,
        }
    }

    pub fn with_stop_loss_hit(mut self) -> Self {
        self.stop_loss_hit = true;
        self
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.current_price = Some(price);
        self
    }

    /// Current price, falling back to the position's last observed price.
    pub fn price(&self) -> Option<Decimal> {
        self.current_price
            .or_else(|| self.position.as_ref().and_then(|p| p.last_price))
    }
}

/// Instruction produced by a strategy, consumed once by the order executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    PlaceOrder {
        symbol: String,
        side: OrderSide,
        order_type: OrderKind,
        amount: Decimal,
        comment: String,
    },
    PlaceOrderWithTakeProfit {
        symbol: String,
        side: OrderSide,
        order_type: OrderKind,
        amount: Decimal,
        take_profit_price: Decimal,
        comment: String,
    },
    ClosePosition {
        symbol: String,
        comment: String,
    },
    CloseAllPositions {
        comment: String,
    },
    PartialClose {
        symbol: String,
        amount: Decimal,
        profit_pct: Decimal,
        comment: String,
    },
}

impl Action {
    /// Symbol the action targets; `None` for account-wide actions.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::PlaceOrder { symbol, .. }
            | Self::PlaceOrderWithTakeProfit { symbol, .. }
            | Self::ClosePosition { symbol, .. }
            | Self::PartialClose { symbol, .. } => Some(symbol),
            Self::CloseAllPositions { .. } => None,
        }
    }

    pub fn comment(&self) -> &str {
        match self {
            Self::PlaceOrder { comment, .. }
            | Self::PlaceOrderWithTakeProfit { comment, .. }
            | Self::ClosePosition { comment, .. }
            | Self::CloseAllPositions { comment }
            | Self::PartialClose { comment, .. } => comment,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlaceOrder { .. } => "place_order",
            Self::PlaceOrderWithTakeProfit { .. } => "place_order_with_take_profit",
            Self::ClosePosition { .. } => "close_position",
            Self::CloseAllPositions { .. } => "close_all_positions",
            Self::PartialClose { .. } => "partial_close",
        }
    }
}
