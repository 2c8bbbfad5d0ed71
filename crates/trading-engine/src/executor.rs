//! Order executor: turns entries, closes and strategy actions into gateway
//! calls that respect the account's position mode.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use exchange_core::api::ExchangeGateway;
use exchange_core::config::ExecutorSettings;
use exchange_core::types::{
    order_type, ExchangeOrder, ExchangePosition, OrderKind, OrderParams, OrderRequest, OrderSide,
    Position, PositionMode, PositionSide, PositionSideTag,
};
use risk_manager::Action;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::conditional::{place_conditional, ConditionalKind, ConditionalOrder, PlacedConditional};
use crate::error::{ExecutionError, Result};
use crate::position_reader::{is_protective_order, PositionReader};

/// Configuration for the order executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on waiting for a filled entry to show up as a position.
    pub settle_timeout: Duration,
    /// Delay between position reads while settling.
    pub settle_poll: Duration,
    /// Leverage applied when an entry does not ask for one.
    pub default_leverage: Option<u32>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(5),
            settle_poll: Duration::from_millis(250),
            default_leverage: None,
        }
    }
}

impl From<&ExecutorSettings> for ExecutorConfig {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            settle_timeout: Duration::from_millis(settings.settle_timeout_ms),
            settle_poll: Duration::from_millis(settings.settle_poll_ms),
            default_leverage: settings.default_leverage,
        }
    }
}

fn default_kind() -> OrderKind {
    OrderKind::Market
}

/// Entry order with optional leverage and percentage-based protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default = "default_kind")]
    pub order_type: OrderKind,
    pub amount: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<u32>,
    /// Stop-loss distance from the realized entry price, in percent.
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    /// Take-profit distance from the realized entry price, in percent.
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
    #[serde(default)]
    pub reduce_only: bool,
}

impl PlaceOrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderKind::Market,
            amount,
            price: None,
            leverage: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            reduce_only: false,
        }
    }
}

/// An order placed through this executor, remembered for cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedOrder {
    pub id: String,
    pub symbol: String,
    pub order_type: String,
    pub side: OrderSide,
    pub placed_at: DateTime<Utc>,
}

/// Parameters for an order that opens or, with `reduce_only`, reduces.
fn entry_params(mode: PositionMode, side: OrderSide, reduce_only: bool) -> OrderParams {
    if mode.is_hedge() {
        let target = if reduce_only {
            side.opening().opposite()
        } else {
            side.opening()
        };
        OrderParams {
            position_side: Some(PositionSideTag::from(target)),
            ..Default::default()
        }
    } else {
        OrderParams {
            reduce_only: reduce_only.then_some(true),
            ..Default::default()
        }
    }
}

/// Parameters for an order that reduces a position on `position_side`.
fn closing_params(mode: PositionMode, position_side: PositionSide) -> OrderParams {
    if mode.is_hedge() {
        OrderParams {
            position_side: Some(PositionSideTag::from(position_side)),
            ..Default::default()
        }
    } else {
        OrderParams {
            reduce_only: Some(true),
            ..Default::default()
        }
    }
}

fn protection_price(kind: ConditionalKind, side: PositionSide, entry: Decimal, pct: Decimal) -> Decimal {
    let offset = pct / Decimal::ONE_HUNDRED;
    match (kind, side) {
        (ConditionalKind::StopLoss, PositionSide::Long)
        | (ConditionalKind::TakeProfit, PositionSide::Short) => entry * (Decimal::ONE - offset),
        (ConditionalKind::StopLoss, PositionSide::Short)
        | (ConditionalKind::TakeProfit, PositionSide::Long) => entry * (Decimal::ONE + offset),
    }
}

/// Executes orders against an exchange gateway.
///
/// Public operations report success as `bool` and log the reason for any
/// failure; nothing here is fatal to the caller.
pub struct OrderExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    reader: PositionReader,
    config: ExecutorConfig,
    /// Orders placed through this executor, by exchange order id.
    tracked_orders: DashMap<String, TrackedOrder>,
    /// Legs closed on request, kept until the reconciler has observed the
    /// exit so a deliberate close is never mistaken for a stop-loss fill.
    /// The value is the completion time, `None` while the close is in flight.
    closed_legs: DashMap<(String, PositionSide), Option<DateTime<Utc>>>,
}

impl OrderExecutor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: ExecutorConfig) -> Self {
        Self {
            reader: PositionReader::new(gateway.clone()),
            gateway,
            config,
            tracked_orders: DashMap::new(),
            closed_legs: DashMap::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    pub fn reader(&self) -> &PositionReader {
        &self.reader
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub async fn get_open_positions(&self) -> Result<Vec<Position>> {
        Ok(self.reader.read_positions().await?)
    }

    pub async fn position_mode(&self) -> Result<PositionMode> {
        Ok(self.gateway.position_mode().await?)
    }

    /// True when the account runs in hedge mode.
    pub async fn get_position_mode(&self) -> Result<bool> {
        Ok(self.position_mode().await?.is_hedge())
    }

    /// Switches position mode. An exchange answer that the mode is already
    /// set counts as success.
    pub async fn set_position_mode(&self, hedge: bool) -> bool {
        let mode = PositionMode::from_hedge(hedge);
        match self.gateway.set_position_mode(mode).await {
            Ok(()) => {
                info!(?mode, "Position mode changed");
                true
            }
            Err(e) if e.is_idempotent_noop() => {
                debug!(?mode, "Position mode already set");
                true
            }
            Err(e) => {
                warn!(?mode, error = %e, "Failed to change position mode");
                false
            }
        }
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> bool {
        match self.gateway.set_leverage(leverage, symbol).await {
            Ok(()) => {
                debug!(symbol, leverage, "Leverage set");
                true
            }
            Err(e) => {
                warn!(symbol, leverage, error = %e, "Failed to set leverage");
                false
            }
        }
    }

    /// Places an entry. With SL/TP percentages, protective orders are
    /// priced from the realized entry once the position is readable; their
    /// failure is logged and never undoes the entry.
    pub async fn place_order(&self, request: &PlaceOrderRequest) -> bool {
        match self.submit_entry(request).await {
            Ok((_, mode)) => {
                if request.stop_loss_pct.is_some() || request.take_profit_pct.is_some() {
                    self.protect_entry(request, mode).await;
                }
                true
            }
            Err(e) => {
                warn!(symbol = %request.symbol, side = %request.side, error = %e, "Order placement failed");
                false
            }
        }
    }

    /// Market entry followed by a take-profit at an absolute price, sized
    /// from the realized position.
    pub async fn place_order_with_take_profit(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        take_profit_price: Decimal,
        leverage: Option<u32>,
    ) -> bool {
        let request = PlaceOrderRequest {
            leverage,
            ..PlaceOrderRequest::market(symbol, side, amount)
        };
        let mode = match self.submit_entry(&request).await {
            Ok((_, mode)) => mode,
            Err(e) => {
                warn!(symbol, side = %side, error = %e, "Entry for take-profit order failed");
                return false;
            }
        };

        match self.await_position(symbol, side.opening()).await {
            Some(position) => {
                // Entry stays open even if protection cannot be placed.
                let _ = self
                    .place_protection(&position, ConditionalKind::TakeProfit, take_profit_price, mode)
                    .await;
            }
            None => warn!(symbol, "Position not readable after entry; take-profit not placed"),
        }
        true
    }

    async fn submit_entry(&self, request: &PlaceOrderRequest) -> Result<(ExchangeOrder, PositionMode)> {
        if request.amount <= Decimal::ZERO {
            return Err(ExecutionError::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        if request.order_type == OrderKind::Limit && request.price.is_none() {
            return Err(ExecutionError::InvalidRequest(
                "limit order requires a price".to_string(),
            ));
        }

        if let Some(leverage) = request.leverage.or(self.config.default_leverage) {
            self.set_leverage(&request.symbol, leverage).await;
        }

        let mode = self.position_mode().await?;
        let mut order = OrderRequest::new(
            request.symbol.clone(),
            request.order_type.as_str(),
            request.side,
            request.amount,
        )
        .with_params(entry_params(mode, request.side, request.reduce_only));
        if let (OrderKind::Limit, Some(price)) = (request.order_type, request.price) {
            order = order.with_price(price);
        }

        let placed = self.gateway.create_order(&order).await?;
        self.track(&placed);
        info!(
            symbol = %request.symbol,
            side = %request.side,
            amount = %request.amount,
            order_id = %placed.id,
            ?mode,
            "Order placed"
        );
        Ok((placed, mode))
    }

    async fn protect_entry(&self, request: &PlaceOrderRequest, mode: PositionMode) {
        let Some(position) = self.await_position(&request.symbol, request.side.opening()).await else {
            warn!(symbol = %request.symbol, "Position not readable after entry; SL/TP not placed");
            return;
        };

        let levels = [
            (ConditionalKind::StopLoss, request.stop_loss_pct),
            (ConditionalKind::TakeProfit, request.take_profit_pct),
        ];
        for (kind, pct) in levels {
            let Some(pct) = pct else { continue };
            let price = protection_price(kind, position.side, position.entry_price, pct);
            let _ = self.place_protection(&position, kind, price, mode).await;
        }
    }

    async fn place_protection(
        &self,
        position: &ExchangePosition,
        kind: ConditionalKind,
        trigger_price: Decimal,
        mode: PositionMode,
    ) -> Result<PlacedConditional> {
        let order = ConditionalOrder {
            symbol: position.symbol.clone(),
            kind,
            position_side: position.side,
            amount: position.contracts,
            trigger_price,
            mode,
        };
        let placed = place_conditional(self.gateway.as_ref(), &order).await?;
        self.track(&placed.order);
        Ok(placed)
    }

    /// Polls until an open position on `side` appears or the settle timeout
    /// elapses.
    async fn await_position(&self, symbol: &str, side: PositionSide) -> Option<ExchangePosition> {
        let symbols = [symbol.to_string()];
        let poll = async {
            loop {
                match self.gateway.fetch_positions(&symbols).await {
                    Ok(rows) => {
                        if let Some(row) = rows.into_iter().find(|row| {
                            row.symbol == symbol && row.side == side && row.contracts > Decimal::ZERO
                        }) {
                            return row;
                        }
                    }
                    Err(e) => debug!(symbol, error = %e, "Position read failed while settling"),
                }
                tokio::time::sleep(self.config.settle_poll).await;
            }
        };
        tokio::time::timeout(self.config.settle_timeout, poll).await.ok()
    }

    async fn open_rows(&self, symbol: &str) -> Result<Vec<ExchangePosition>> {
        let rows: Vec<ExchangePosition> = self
            .gateway
            .fetch_positions(&[symbol.to_string()])
            .await?
            .into_iter()
            .filter(|row| row.symbol == symbol && row.contracts > Decimal::ZERO)
            .collect();
        if rows.is_empty() {
            return Err(ExecutionError::NoPosition(symbol.to_string()));
        }
        Ok(rows)
    }

    /// Closes every open position on `symbol` with a market order.
    pub async fn close_position(&self, symbol: &str) -> bool {
        match self.try_close_position(symbol).await {
            Ok(()) => true,
            Err(ExecutionError::NoPosition(_)) => {
                info!(symbol, "No open position to close");
                false
            }
            Err(e) => {
                warn!(symbol, error = %e, "Failed to close position");
                false
            }
        }
    }

    async fn try_close_position(&self, symbol: &str) -> Result<()> {
        let rows = self.open_rows(symbol).await?;
        let mode = self.position_mode().await?;

        let mut outcome = Ok(());
        for row in rows {
            let order = OrderRequest::new(symbol, order_type::MARKET, row.side.closing_side(), row.contracts)
                .with_params(closing_params(mode, row.side));
            // Marked before submission: the leg can vanish before the call returns.
            let leg = (symbol.to_string(), row.side);
            self.closed_legs.insert(leg.clone(), None);
            match self.gateway.create_order(&order).await {
                Ok(placed) => {
                    self.closed_legs.insert(leg, Some(Utc::now()));
                    self.track(&placed);
                    info!(symbol, side = %row.side, size = %row.contracts, "Position closed");
                }
                Err(e) => {
                    self.closed_legs.remove(&leg);
                    warn!(symbol, side = %row.side, error = %e, "Close order rejected");
                    outcome = Err(e.into());
                }
            }
        }
        outcome
    }

    /// Attempts to close every open position. Returns false if any close
    /// failed; a failure never stops the remaining symbols.
    pub async fn close_all_positions(&self) -> bool {
        let rows = match self.gateway.fetch_positions(&[]).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Could not list positions to close");
                return false;
            }
        };
        let symbols: BTreeSet<String> = rows
            .into_iter()
            .filter(|row| row.contracts > Decimal::ZERO)
            .map(|row| row.symbol)
            .collect();

        let mut all_closed = true;
        for symbol in &symbols {
            if !self.close_position(symbol).await {
                all_closed = false;
            }
        }
        info!(count = symbols.len(), all_closed, "Close-all finished");
        all_closed
    }

    /// Reduces the position on `symbol` by up to `amount`.
    pub async fn partial_close(&self, symbol: &str, amount: Decimal) -> bool {
        match self.try_partial_close(symbol, amount).await {
            Ok(closed) => {
                info!(symbol, amount = %closed, "Partial close placed");
                true
            }
            Err(e) => {
                warn!(symbol, amount = %amount, error = %e, "Partial close failed");
                false
            }
        }
    }

    async fn try_partial_close(&self, symbol: &str, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(ExecutionError::InvalidRequest(format!(
                "partial close amount must be positive, got {amount}"
            )));
        }
        let rows = self.open_rows(symbol).await?;
        let row = &rows[0];
        let mode = self.position_mode().await?;

        let quantity = amount.min(row.contracts);
        let order = OrderRequest::new(symbol, order_type::MARKET, row.side.closing_side(), quantity)
            .with_params(closing_params(mode, row.side));
        let leg = (symbol.to_string(), row.side);
        let closes_leg = quantity >= row.contracts;
        if closes_leg {
            self.closed_legs.insert(leg.clone(), None);
        }
        match self.gateway.create_order(&order).await {
            Ok(placed) => {
                if closes_leg {
                    self.closed_legs.insert(leg, Some(Utc::now()));
                }
                self.track(&placed);
                Ok(quantity)
            }
            Err(e) => {
                if closes_leg {
                    self.closed_legs.remove(&leg);
                }
                Err(e.into())
            }
        }
    }

    /// Replaces the position's protective orders: cancels existing stop and
    /// take-profit orders (best effort), then places the requested ones.
    pub async fn set_position_sltp(
        &self,
        symbol: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> bool {
        match self.try_set_position_sltp(symbol, stop_loss, take_profit).await {
            Ok(all_placed) => all_placed,
            Err(e) => {
                warn!(symbol, error = %e, "Failed to set SL/TP");
                false
            }
        }
    }

    async fn try_set_position_sltp(
        &self,
        symbol: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<bool> {
        let rows = self.open_rows(symbol).await?;
        let position = &rows[0];
        let mode = self.position_mode().await?;

        match self.gateway.fetch_open_orders(Some(symbol)).await {
            Ok(orders) => {
                for order in orders.iter().filter(|order| is_protective_order(order)) {
                    match self.gateway.cancel_order(&order.id, symbol).await {
                        Ok(()) => {
                            self.tracked_orders.remove(&order.id);
                            debug!(symbol, order_id = %order.id, "Cancelled protective order");
                        }
                        Err(e) => {
                            warn!(symbol, order_id = %order.id, error = %e, "Failed to cancel protective order")
                        }
                    }
                }
            }
            Err(e) => warn!(symbol, error = %e, "Could not list open orders before replacing SL/TP"),
        }

        let mut all_placed = true;
        for (kind, price) in [
            (ConditionalKind::StopLoss, stop_loss),
            (ConditionalKind::TakeProfit, take_profit),
        ] {
            let Some(price) = price else { continue };
            if self.place_protection(position, kind, price, mode).await.is_err() {
                all_placed = false;
            }
        }
        Ok(all_placed)
    }

    /// Cancels an order by id, resolving its symbol from local tracking
    /// first and the exchange's open orders second.
    pub async fn cancel_order(&self, order_id: &str) -> bool {
        match self.try_cancel_order(order_id).await {
            Ok(symbol) => {
                info!(order_id, symbol = %symbol, "Order cancelled");
                true
            }
            Err(e) => {
                warn!(order_id, error = %e, "Failed to cancel order");
                false
            }
        }
    }

    async fn try_cancel_order(&self, order_id: &str) -> Result<String> {
        let tracked = self
            .tracked_orders
            .get(order_id)
            .map(|order| order.symbol.clone());
        let symbol = match tracked {
            Some(symbol) => symbol,
            None => self
                .gateway
                .fetch_open_orders(None)
                .await?
                .into_iter()
                .find(|order| order.id == order_id)
                .map(|order| order.symbol)
                .ok_or_else(|| ExecutionError::OrderNotFound(order_id.to_string()))?,
        };

        self.gateway.cancel_order(order_id, &symbol).await?;
        self.tracked_orders.remove(order_id);
        Ok(symbol)
    }

    /// Routes a strategy action to the matching operation.
    pub async fn execute(&self, action: &Action) -> bool {
        info!(action = action.kind(), symbol = ?action.symbol(), comment = action.comment(), "Executing strategy action");
        match action {
            Action::PlaceOrder {
                symbol,
                side,
                order_type,
                amount,
                ..
            } => {
                let request = PlaceOrderRequest {
                    order_type: *order_type,
                    ..PlaceOrderRequest::market(symbol.clone(), *side, *amount)
                };
                self.place_order(&request).await
            }
            Action::PlaceOrderWithTakeProfit {
                symbol,
                side,
                amount,
                take_profit_price,
                ..
            } => {
                self.place_order_with_take_profit(symbol, *side, *amount, *take_profit_price, None)
                    .await
            }
            Action::ClosePosition { symbol, .. } => self.close_position(symbol).await,
            Action::CloseAllPositions { .. } => self.close_all_positions().await,
            Action::PartialClose { symbol, amount, .. } => self.partial_close(symbol, *amount).await,
        }
    }

    pub fn tracked_orders(&self) -> Vec<TrackedOrder> {
        let mut orders: Vec<TrackedOrder> = self
            .tracked_orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| order.placed_at);
        orders
    }

    /// Legs closed through this executor and not yet acknowledged.
    pub fn closed_legs(&self) -> HashSet<(String, PositionSide)> {
        self.closed_legs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drops the closed-leg marks a position read started at `read_at` has
    /// settled: legs missing from `open`, and legs whose close completed
    /// before the read (a leg still open then is a new position).
    pub fn acknowledge_closed(&self, open: &HashSet<(String, PositionSide)>, read_at: DateTime<Utc>) {
        self.closed_legs.retain(|leg, completed| {
            open.contains(leg) && !completed.is_some_and(|at| at < read_at)
        });
    }

    fn track(&self, order: &ExchangeOrder) {
        self.tracked_orders.insert(
            order.id.clone(),
            TrackedOrder {
                id: order.id.clone(),
                symbol: order.symbol.clone(),
                order_type: order.order_type.clone(),
                side: order.side,
                placed_at: order.timestamp,
            },
        );
    }
}
