//! In-memory paper exchange.
//!
//! Fills market orders at the last set price, keeps conditional and limit
//! orders resting until [`PaperExchange::set_price`] crosses them, and
//! enforces the hedge-mode parameter rules a live venue enforces. Every
//! request is journaled so callers can assert on exactly what was sent.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ExchangeGateway;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    market_id, order_type, ExchangeOrder, ExchangePosition, OrderParams, OrderRequest, OrderSide,
    PositionMode, PositionSide, PositionSideTag, Ticker,
};

const MAX_LEVERAGE: u32 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    StopLoss(Decimal),
    TakeProfit(Decimal),
    Limit(Decimal),
}

impl Trigger {
    fn crossed(self, side: OrderSide, price: Decimal) -> bool {
        match (self, side) {
            (Self::StopLoss(t), OrderSide::Sell) => price <= t,
            (Self::StopLoss(t), OrderSide::Buy) => price >= t,
            (Self::TakeProfit(t), OrderSide::Sell) => price >= t,
            (Self::TakeProfit(t), OrderSide::Buy) => price <= t,
            (Self::Limit(l), OrderSide::Buy) => price <= l,
            (Self::Limit(l), OrderSide::Sell) => price >= l,
        }
    }
}

#[derive(Debug, Clone)]
struct RestingOrder {
    order: ExchangeOrder,
    trigger: Trigger,
    params: OrderParams,
}

#[derive(Debug, Clone, Copy)]
struct Lot {
    contracts: Decimal,
    entry_price: Decimal,
}

#[derive(Debug)]
struct PaperBook {
    prices: HashMap<String, Decimal>,
    lots: HashMap<(String, PositionSide), Lot>,
    resting: Vec<RestingOrder>,
    mode: PositionMode,
    leverage: HashMap<String, u32>,
    submitted: Vec<OrderRequest>,
    direct_submitted: Vec<BTreeMap<String, String>>,
    rejected_types: HashSet<String>,
    failing_symbols: HashSet<String>,
    reject_direct: bool,
    fail_cancels: bool,
    offline: bool,
}

impl Default for PaperBook {
    fn default() -> Self {
        Self {
            prices: HashMap::new(),
            lots: HashMap::new(),
            resting: Vec::new(),
            mode: PositionMode::OneWay,
            leverage: HashMap::new(),
            submitted: Vec::new(),
            direct_submitted: Vec::new(),
            rejected_types: HashSet::new(),
            failing_symbols: HashSet::new(),
            reject_direct: false,
            fail_cancels: false,
            offline: false,
        }
    }
}

impl PaperBook {
    fn check_online(&self) -> GatewayResult<()> {
        if self.offline {
            return Err(GatewayError::Network("exchange unreachable".to_string()));
        }
        Ok(())
    }

    fn check_rejections(&self, request: &OrderRequest) -> GatewayResult<()> {
        if self.failing_symbols.contains(&request.symbol) {
            return Err(GatewayError::rejected(-1121, "Invalid symbol."));
        }
        if self
            .rejected_types
            .contains(&request.order_type.to_lowercase())
        {
            return Err(GatewayError::rejected(-1116, "Invalid orderType."));
        }
        match (self.mode, request.params.position_side, request.params.reduce_only) {
            (PositionMode::Hedge, _, Some(_)) => Err(GatewayError::rejected(
                -1106,
                "Parameter 'reduceonly' sent when not required.",
            )),
            (PositionMode::Hedge, None, _) | (PositionMode::OneWay, Some(_), _) => {
                Err(GatewayError::rejected(
                    -4061,
                    "Order's position side does not match user's setting.",
                ))
            }
            _ => Ok(()),
        }
    }

    fn price_of(&self, symbol: &str) -> GatewayResult<Decimal> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("no market data for {symbol}")))
    }

    fn place(&mut self, request: &OrderRequest) -> GatewayResult<ExchangeOrder> {
        self.check_rejections(request)?;
        let last = self.price_of(&request.symbol)?;
        let token = request.order_type.to_lowercase();

        let mut order = ExchangeOrder {
            id: Uuid::new_v4().simple().to_string(),
            symbol: request.symbol.clone(),
            order_type: token.clone(),
            side: request.side,
            amount: request.amount,
            price: request.price,
            stop_price: request.params.stop_price,
            trigger_price: None,
            info: HashMap::new(),
            timestamp: Utc::now(),
        };

        let conditional = request.params.stop_price.is_some()
            || token.contains("stop")
            || token.contains("take_profit");

        if conditional {
            let trigger_price = request.params.stop_price.ok_or_else(|| {
                GatewayError::rejected(-1102, "Mandatory parameter 'stopPrice' was not sent.")
            })?;
            let is_take_profit = if token.contains("take_profit") {
                true
            } else if token.contains("stop") {
                false
            } else {
                // Generic type with a trigger: infer from where the trigger sits.
                match request.side {
                    OrderSide::Sell => trigger_price > last,
                    OrderSide::Buy => trigger_price < last,
                }
            };
            let (trigger, reported) = if is_take_profit {
                (Trigger::TakeProfit(trigger_price), "take_profit_market")
            } else {
                (Trigger::StopLoss(trigger_price), "stop_market")
            };
            if token == order_type::MARKET {
                order.order_type = reported.to_string();
            }
            debug!(symbol = %request.symbol, order_type = %order.order_type, trigger = %trigger_price, "Paper conditional order resting");
            self.resting.push(RestingOrder {
                order: order.clone(),
                trigger,
                params: request.params.clone(),
            });
            return Ok(order);
        }

        match token.as_str() {
            order_type::MARKET => {
                self.fill(request.symbol.as_str(), request.side, request.amount, last, &request.params)?;
                order.price = Some(last);
                Ok(order)
            }
            order_type::LIMIT => {
                let limit = request.price.ok_or_else(|| {
                    GatewayError::rejected(-1102, "Mandatory parameter 'price' was not sent.")
                })?;
                let trigger = Trigger::Limit(limit);
                if trigger.crossed(request.side, last) {
                    self.fill(request.symbol.as_str(), request.side, request.amount, limit, &request.params)?;
                } else {
                    self.resting.push(RestingOrder {
                        order: order.clone(),
                        trigger,
                        params: request.params.clone(),
                    });
                }
                Ok(order)
            }
            _ => Err(GatewayError::rejected(-1116, "Invalid orderType.")),
        }
    }

    /// Applies a fill and returns the filled quantity.
    fn fill(
        &mut self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        params: &OrderParams,
    ) -> GatewayResult<Decimal> {
        let closing_only =
            params.reduce_only.unwrap_or(false) || params.close_position.unwrap_or(false);

        let (reducing_side, may_open) = match params.position_side {
            Some(tag) => {
                let lot_side = PositionSide::from(tag);
                if side == lot_side.opening_side() {
                    self.increase(symbol, lot_side, amount, price);
                    return Ok(amount);
                }
                (lot_side, false)
            }
            None => (side.opening().opposite(), !closing_only),
        };

        let key = (symbol.to_string(), reducing_side);
        let mut remaining = amount;
        let mut filled = Decimal::ZERO;
        if let Some(lot) = self.lots.get_mut(&key) {
            let qty = if params.close_position.unwrap_or(false) {
                lot.contracts
            } else {
                remaining.min(lot.contracts)
            };
            lot.contracts -= qty;
            remaining -= qty;
            filled += qty;
            if lot.contracts.is_zero() {
                self.lots.remove(&key);
                info!(symbol, side = %reducing_side, "Paper position closed");
            }
        }

        if filled.is_zero() && !may_open {
            return Err(GatewayError::rejected(-2022, "ReduceOnly Order is rejected."));
        }
        if may_open && remaining > Decimal::ZERO {
            self.increase(symbol, side.opening(), remaining, price);
            filled += remaining;
        }
        Ok(filled)
    }

    fn increase(&mut self, symbol: &str, side: PositionSide, amount: Decimal, price: Decimal) {
        let lot = self
            .lots
            .entry((symbol.to_string(), side))
            .or_insert(Lot {
                contracts: Decimal::ZERO,
                entry_price: price,
            });
        let total = lot.contracts + amount;
        if !total.is_zero() {
            lot.entry_price = (lot.entry_price * lot.contracts + price * amount) / total;
        }
        lot.contracts = total;
    }

    fn trigger_resting(&mut self, symbol: &str, price: Decimal) {
        let (triggered, resting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.resting)
            .into_iter()
            .partition(|r| r.order.symbol == symbol && r.trigger.crossed(r.order.side, price));
        self.resting = resting;

        for order in triggered {
            let fill_price = match order.trigger {
                Trigger::Limit(limit) => limit,
                _ => price,
            };
            match self.fill(symbol, order.order.side, order.order.amount, fill_price, &order.params) {
                Ok(qty) => info!(symbol, order_id = %order.order.id, quantity = %qty, price = %fill_price, "Paper order triggered"),
                Err(e) => warn!(symbol, order_id = %order.order.id, error = %e, "Paper order triggered with nothing to fill"),
            }
        }
    }

    fn resolve_market_id(&self, id: &str) -> Option<String> {
        self.prices
            .keys()
            .chain(self.lots.keys().map(|(symbol, _)| symbol))
            .find(|symbol| market_id(symbol) == id)
            .cloned()
    }
}

fn parse_direct(book: &PaperBook, params: &BTreeMap<String, String>) -> GatewayResult<OrderRequest> {
    let field = |key: &str| {
        params
            .get(key)
            .ok_or_else(|| GatewayError::rejected(-1102, format!("Mandatory parameter '{key}' was not sent.")))
    };
    let decimal = |key: &str| -> GatewayResult<Decimal> {
        field(key)?
            .parse()
            .map_err(|_| GatewayError::rejected(-1100, format!("Illegal characters found in parameter '{key}'.")))
    };

    let symbol = book
        .resolve_market_id(field("symbol")?)
        .ok_or_else(|| GatewayError::rejected(-1121, "Invalid symbol."))?;
    let side: OrderSide = field("side")?
        .parse()
        .map_err(|e: String| GatewayError::rejected(-1100, e))?;
    let position_side = match params.get("positionSide").map(String::as_str) {
        Some("LONG") => Some(PositionSideTag::Long),
        Some("SHORT") => Some(PositionSideTag::Short),
        _ => None,
    };

    Ok(OrderRequest::new(symbol, field("type")?.clone(), side, decimal("quantity")?).with_params(
        OrderParams {
            stop_price: Some(decimal("stopPrice")?),
            reduce_only: params.get("reduceOnly").map(|v| v == "true"),
            close_position: params.get("closePosition").map(|v| v == "true"),
            position_side,
        },
    ))
}

/// In-memory exchange used for paper trading and tests.
#[derive(Debug, Default)]
pub struct PaperExchange {
    book: Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: impl Into<String>, price: Decimal) -> Self {
        self.book.get_mut().prices.insert(symbol.into(), price);
        self
    }

    pub fn with_mode(mut self, mode: PositionMode) -> Self {
        self.book.get_mut().mode = mode;
        self
    }

    pub fn with_position(
        mut self,
        symbol: impl Into<String>,
        side: PositionSide,
        contracts: Decimal,
        entry_price: Decimal,
    ) -> Self {
        self.book.get_mut().lots.insert(
            (symbol.into(), side),
            Lot {
                contracts,
                entry_price,
            },
        );
        self
    }

    /// Moves the market and fills any resting order the new price crosses.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut book = self.book.lock().await;
        book.prices.insert(symbol.to_string(), price);
        book.trigger_resting(symbol, price);
    }

    /// Rejects every future order of this type (case-insensitive).
    pub async fn reject_order_type(&self, order_type: &str) {
        self.book
            .lock()
            .await
            .rejected_types
            .insert(order_type.to_lowercase());
    }

    /// Rejects every future order for this symbol.
    pub async fn fail_symbol(&self, symbol: &str) {
        self.book
            .lock()
            .await
            .failing_symbols
            .insert(symbol.to_string());
    }

    pub async fn reject_direct_orders(&self) {
        self.book.lock().await.reject_direct = true;
    }

    pub async fn fail_cancels(&self, fail: bool) {
        self.book.lock().await.fail_cancels = fail;
    }

    /// Fails every read (tickers, positions, open orders, position mode)
    /// with a network error while set.
    pub async fn set_offline(&self, offline: bool) {
        self.book.lock().await.offline = offline;
    }

    /// Every request passed to `create_order`, accepted or not.
    pub async fn submitted(&self) -> Vec<OrderRequest> {
        self.book.lock().await.submitted.clone()
    }

    /// Every parameter map passed to `submit_direct_order`.
    pub async fn direct_submitted(&self) -> Vec<BTreeMap<String, String>> {
        self.book.lock().await.direct_submitted.clone()
    }

    pub async fn leverage(&self, symbol: &str) -> Option<u32> {
        self.book.lock().await.leverage.get(symbol).copied()
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn fetch_ticker(&self, symbol: &str) -> GatewayResult<Ticker> {
        let book = self.book.lock().await;
        book.check_online()?;
        Ok(Ticker::new(symbol, book.price_of(symbol)?))
    }

    async fn fetch_positions(&self, symbols: &[String]) -> GatewayResult<Vec<ExchangePosition>> {
        let book = self.book.lock().await;
        book.check_online()?;
        let mut positions: Vec<ExchangePosition> = book
            .lots
            .iter()
            .filter(|((symbol, _), _)| symbols.is_empty() || symbols.contains(symbol))
            .map(|((symbol, side), lot)| {
                let mark = book.prices.get(symbol).copied();
                let unrealized_pnl = mark
                    .map(|m| match side {
                        PositionSide::Long => (m - lot.entry_price) * lot.contracts,
                        PositionSide::Short => (lot.entry_price - m) * lot.contracts,
                    })
                    .unwrap_or_default();
                ExchangePosition {
                    symbol: symbol.clone(),
                    side: *side,
                    contracts: lot.contracts,
                    entry_price: lot.entry_price,
                    unrealized_pnl,
                    mark_price: mark,
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> GatewayResult<Vec<ExchangeOrder>> {
        let book = self.book.lock().await;
        book.check_online()?;
        Ok(book
            .resting
            .iter()
            .filter(|r| symbol.map_or(true, |s| r.order.symbol == s))
            .map(|r| r.order.clone())
            .collect())
    }

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<ExchangeOrder> {
        let mut book = self.book.lock().await;
        book.submitted.push(request.clone());
        book.place(request)
    }

    async fn submit_direct_order(
        &self,
        params: &BTreeMap<String, String>,
    ) -> GatewayResult<ExchangeOrder> {
        let mut book = self.book.lock().await;
        book.direct_submitted.push(params.clone());
        if book.reject_direct {
            return Err(GatewayError::rejected(-1111, "Precision is over the maximum defined for this asset."));
        }
        let request = parse_direct(&book, params)?;
        book.place(&request)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> GatewayResult<()> {
        let mut book = self.book.lock().await;
        if book.fail_cancels {
            return Err(GatewayError::Network("connection reset by peer".to_string()));
        }
        let before = book.resting.len();
        book.resting
            .retain(|r| !(r.order.id == order_id && r.order.symbol == symbol));
        if book.resting.len() == before {
            return Err(GatewayError::NotFound(format!("order {order_id} on {symbol}")));
        }
        Ok(())
    }

    async fn set_leverage(&self, leverage: u32, symbol: &str) -> GatewayResult<()> {
        if leverage == 0 || leverage > MAX_LEVERAGE {
            return Err(GatewayError::rejected(-4028, format!("Leverage {leverage} is not valid")));
        }
        self.book
            .lock()
            .await
            .leverage
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn position_mode(&self) -> GatewayResult<PositionMode> {
        let book = self.book.lock().await;
        book.check_online()?;
        Ok(book.mode)
    }

    async fn set_position_mode(&self, mode: PositionMode) -> GatewayResult<()> {
        let mut book = self.book.lock().await;
        if book.mode == mode {
            return Err(GatewayError::rejected(-4059, "No need to change position side."));
        }
        if !book.lots.is_empty() {
            return Err(GatewayError::rejected(
                -4068,
                "Position side cannot be changed if there exists position.",
            ));
        }
        book.mode = mode;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const BTC: &str = "BTC/USDT:USDT";

    fn stop_params(stop: Decimal) -> OrderParams {
        OrderParams {
            stop_price: Some(stop),
            reduce_only: Some(true),
            close_position: Some(true),
            position_side: None,
        }
    }

    #[tokio::test]
    async fn test_market_order_opens_and_closes_one_way() {
        let paper = PaperExchange::new().with_price(BTC, dec!(100));

        let order = OrderRequest::new(BTC, "market", OrderSide::Buy, dec!(2));
        paper.create_order(&order).await.unwrap();

        let positions = paper.fetch_positions(&[]).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Long);
        assert_eq!(positions[0].contracts, dec!(2));
        assert_eq!(positions[0].entry_price, dec!(100));

        let close = OrderRequest::new(BTC, "market", OrderSide::Sell, dec!(2)).with_params(OrderParams {
            reduce_only: Some(true),
            ..Default::default()
        });
        paper.create_order(&close).await.unwrap();
        assert!(paper.fetch_positions(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hedge_mode_rejects_reduce_only() {
        let paper = PaperExchange::new()
            .with_price(BTC, dec!(100))
            .with_mode(PositionMode::Hedge)
            .with_position(BTC, PositionSide::Long, dec!(1), dec!(90));

        let bad = OrderRequest::new(BTC, "market", OrderSide::Sell, dec!(1)).with_params(OrderParams {
            reduce_only: Some(true),
            position_side: Some(PositionSideTag::Long),
            ..Default::default()
        });
        let err = paper.create_order(&bad).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { code: Some(-1106), .. }));

        let untagged = OrderRequest::new(BTC, "market", OrderSide::Sell, dec!(1));
        assert!(paper.create_order(&untagged).await.is_err());

        let good = OrderRequest::new(BTC, "market", OrderSide::Sell, dec!(1)).with_params(OrderParams {
            position_side: Some(PositionSideTag::Long),
            ..Default::default()
        });
        paper.create_order(&good).await.unwrap();
        assert!(paper.fetch_positions(&[]).await.unwrap().is_empty());
        assert_eq!(paper.submitted().await.len(), 3);
    }

    #[tokio::test]
    async fn test_stop_order_rests_and_triggers() {
        let paper = PaperExchange::new()
            .with_price(BTC, dec!(100))
            .with_position(BTC, PositionSide::Long, dec!(1), dec!(100));

        let stop = OrderRequest::new(BTC, "market", OrderSide::Sell, dec!(1)).with_params(stop_params(dec!(95)));
        let placed = paper.create_order(&stop).await.unwrap();
        assert_eq!(placed.order_type, "stop_market");
        assert_eq!(paper.fetch_open_orders(Some(BTC)).await.unwrap().len(), 1);

        paper.set_price(BTC, dec!(96)).await;
        assert_eq!(paper.fetch_positions(&[]).await.unwrap().len(), 1);

        paper.set_price(BTC, dec!(95)).await;
        assert!(paper.fetch_positions(&[]).await.unwrap().is_empty());
        assert!(paper.fetch_open_orders(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generic_trigger_above_price_is_take_profit() {
        let paper = PaperExchange::new()
            .with_price(BTC, dec!(100))
            .with_position(BTC, PositionSide::Long, dec!(1), dec!(100));

        let tp = OrderRequest::new(BTC, "market", OrderSide::Sell, dec!(1)).with_params(stop_params(dec!(110)));
        let placed = paper.create_order(&tp).await.unwrap();
        assert_eq!(placed.order_type, "take_profit_market");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let paper = PaperExchange::new().with_price(BTC, dec!(100));
        paper.reject_order_type("STOP_MARKET").await;
        paper.fail_symbol("ETH/USDT:USDT").await;

        let stop = OrderRequest::new(BTC, "stop_market", OrderSide::Sell, dec!(1)).with_params(stop_params(dec!(95)));
        assert!(paper.create_order(&stop).await.is_err());

        let eth = OrderRequest::new("ETH/USDT:USDT", "market", OrderSide::Buy, dec!(1));
        assert!(matches!(
            paper.create_order(&eth).await,
            Err(GatewayError::Rejected { code: Some(-1121), .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_fails_reads() {
        let paper = PaperExchange::new()
            .with_price(BTC, dec!(100))
            .with_position(BTC, PositionSide::Long, dec!(1), dec!(100));
        paper.set_offline(true).await;
        assert!(matches!(paper.position_mode().await, Err(GatewayError::Network(_))));
        assert!(paper.fetch_positions(&[]).await.is_err());
        assert!(paper.fetch_open_orders(Some(BTC)).await.is_err());

        paper.set_offline(false).await;
        assert_eq!(paper.position_mode().await.unwrap(), PositionMode::OneWay);
    }

    #[tokio::test]
    async fn test_direct_order_resolves_market_id() {
        let paper = PaperExchange::new()
            .with_price(BTC, dec!(100))
            .with_position(BTC, PositionSide::Long, dec!(1), dec!(100));

        let params: BTreeMap<String, String> = [
            ("symbol", "BTCUSDT"),
            ("side", "SELL"),
            ("type", "STOP_MARKET"),
            ("stopPrice", "95"),
            ("quantity", "1"),
            ("reduceOnly", "true"),
            ("timeInForce", "GTC"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let order = paper.submit_direct_order(&params).await.unwrap();
        assert_eq!(order.symbol, BTC);
        assert_eq!(order.stop_price, Some(dec!(95)));
        assert_eq!(paper.direct_submitted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_position_mode_noop_rejection() {
        let paper = PaperExchange::new();
        let err = paper.set_position_mode(PositionMode::OneWay).await.unwrap_err();
        assert!(err.is_idempotent_noop());

        paper.set_position_mode(PositionMode::Hedge).await.unwrap();
        assert_eq!(paper.position_mode().await.unwrap(), PositionMode::Hedge);
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let paper = PaperExchange::new().with_price(BTC, dec!(100));
        assert!(matches!(
            paper.cancel_order("missing", BTC).await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
