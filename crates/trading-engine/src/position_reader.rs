//! Normalizes exchange positions and infers their protective order levels.

use exchange_core::api::ExchangeGateway;
use exchange_core::types::{order_type, ExchangeOrder, ExchangePosition, Position};
use exchange_core::GatewayResult;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stop-loss and take-profit levels found among a symbol's open orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectionLevels {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

pub fn is_stop_loss_order(order: &ExchangeOrder) -> bool {
    let token = order.type_token();
    (token.contains("stop") && !token.contains("profit")) || token == order_type::STOP_LOSS
}

pub fn is_take_profit_order(order: &ExchangeOrder) -> bool {
    order.type_token().contains("take_profit")
}

/// Any conditional order the executor replaces when re-arming a position.
pub fn is_protective_order(order: &ExchangeOrder) -> bool {
    let token = order.type_token();
    token.contains("stop") || token.contains("take_profit")
}

fn stop_loss_trigger(order: &ExchangeOrder) -> Option<Decimal> {
    order
        .stop_price
        .or(order.trigger_price)
        .or_else(|| order.info_decimal("stopPrice"))
}

/// Trigger prices of every resting stop-loss order in `orders`.
pub fn stop_loss_levels(orders: &[ExchangeOrder]) -> Vec<Decimal> {
    orders
        .iter()
        .filter(|order| is_stop_loss_order(order))
        .filter_map(stop_loss_trigger)
        .collect()
}

/// Scans `orders` in sequence; when several match, the last one wins.
pub fn classify_protection(orders: &[ExchangeOrder]) -> ProtectionLevels {
    let mut levels = ProtectionLevels::default();

    for order in orders {
        if is_stop_loss_order(order) {
            if let Some(price) = stop_loss_trigger(order) {
                levels.stop_loss = Some(price);
            }
        } else if is_take_profit_order(order) {
            if let Some(price) = order
                .stop_price
                .or(order.trigger_price)
                .or(order.price)
                .or_else(|| order.info_decimal("takeProfitPrice"))
            {
                levels.take_profit = Some(price);
            }
        }
    }

    levels
}

/// Builds [`Position`] snapshots from gateway state.
#[derive(Clone)]
pub struct PositionReader {
    gateway: Arc<dyn ExchangeGateway>,
}

impl PositionReader {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Every open position with its inferred SL/TP levels. Zero-size rows
    /// are dropped. A failed order lookup leaves that position's levels
    /// unknown rather than failing the whole read.
    pub async fn read_positions(&self) -> GatewayResult<Vec<Position>> {
        let raw = self.gateway.fetch_positions(&[]).await?;
        let mut positions = Vec::with_capacity(raw.len());
        for row in raw.into_iter().filter(|row| row.contracts > Decimal::ZERO) {
            positions.push(self.normalize(row).await);
        }
        debug!(count = positions.len(), "Read open positions");
        Ok(positions)
    }

    async fn normalize(&self, row: ExchangePosition) -> Position {
        let levels = match self.gateway.fetch_open_orders(Some(&row.symbol)).await {
            Ok(orders) => classify_protection(&orders),
            Err(e) => {
                warn!(symbol = %row.symbol, error = %e, "Could not read open orders for position");
                ProtectionLevels::default()
            }
        };

        let last_price = match row.mark_price {
            Some(price) => Some(price),
            None => self
                .gateway
                .fetch_ticker(&row.symbol)
                .await
                .map(|ticker| ticker.last_price)
                .ok(),
        };

        Position {
            symbol: row.symbol,
            side: row.side,
            size: row.contracts,
            entry_price: row.entry_price,
            unrealized_pnl: row.unrealized_pnl,
            stop_loss_price: levels.stop_loss,
            take_profit_price: levels.take_profit,
            last_price,
        }
    }
}
