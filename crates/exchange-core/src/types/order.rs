//! Order types for trading execution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::position::PositionSide;

/// Order-type spellings understood by the gateway.
///
/// Conditional orders are not spelled uniformly across exchanges, so these
/// stay plain strings rather than a closed enum.
pub mod order_type {
    pub const MARKET: &str = "market";
    pub const LIMIT: &str = "limit";
    pub const STOP_MARKET: &str = "STOP_MARKET";
    pub const STOP: &str = "STOP";
    pub const TAKE_PROFIT_MARKET: &str = "TAKE_PROFIT_MARKET";
    pub const TAKE_PROFIT: &str = "TAKE_PROFIT";
    pub const STOP_LOSS: &str = "stop_loss";
}

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Position side an order on this side opens.
    pub fn opening(self) -> PositionSide {
        match self {
            Self::Buy => PositionSide::Long,
            Self::Sell => PositionSide::Short,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Upper-case spelling used by the low-level order endpoint.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

/// Entry order kind accepted by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => order_type::MARKET,
            Self::Limit => order_type::LIMIT,
        }
    }
}

/// `positionSide` tag required on every order in hedge mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSideTag {
    Long,
    Short,
}

impl PositionSideTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl From<PositionSide> for PositionSideTag {
    fn from(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => Self::Long,
            PositionSide::Short => Self::Short,
        }
    }
}

impl From<PositionSideTag> for PositionSide {
    fn from(tag: PositionSideTag) -> Self {
        match tag {
            PositionSideTag::Long => Self::Long,
            PositionSideTag::Short => Self::Short,
        }
    }
}

/// Exchange-specific order parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_position: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_side: Option<PositionSideTag>,
}

/// A request handed to [`crate::api::ExchangeGateway::create_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub order_type: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub params: OrderParams,
}

impl OrderRequest {
    pub fn new(
        symbol: impl Into<String>,
        order_type: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            order_type: order_type.into(),
            side,
            amount,
            price: None,
            params: OrderParams::default(),
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_params(mut self, params: OrderParams) -> Self {
        self.params = params;
        self
    }
}

/// Order as reported back by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOrder {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    /// Raw exchange payload; some venues only report trigger prices here.
    #[serde(default)]
    pub info: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ExchangeOrder {
    /// Lower-cased type token used for classification.
    pub fn type_token(&self) -> String {
        self.order_type.to_lowercase()
    }

    /// Reads a decimal from the raw payload, accepting numbers or strings.
    pub fn info_decimal(&self, key: &str) -> Option<Decimal> {
        match self.info.get(key)? {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.to_string().parse().ok(),
            _ => None,
        }
    }
}

/// Compact market id used by the low-level endpoint: `BTC/USDT:USDT` -> `BTCUSDT`.
pub fn market_id(symbol: &str) -> String {
    symbol
        .split(':')
        .next()
        .unwrap_or(symbol)
        .replace('/', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_id() {
        assert_eq!(market_id("BTC/USDT:USDT"), "BTCUSDT");
        assert_eq!(market_id("ETH/USDT"), "ETHUSDT");
        assert_eq!(market_id("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn test_params_omit_unset_fields() {
        let params = OrderParams {
            position_side: Some(PositionSideTag::Short),
            close_position: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["positionSide"], "SHORT");
        assert_eq!(json["closePosition"], true);
        assert!(json.get("reduceOnly").is_none());
    }

    #[test]
    fn test_info_decimal_accepts_strings() {
        let mut info = HashMap::new();
        info.insert("stopPrice".to_string(), serde_json::json!("95.5"));
        let order = ExchangeOrder {
            id: "1".into(),
            symbol: "BTC/USDT:USDT".into(),
            order_type: "STOP_MARKET".into(),
            side: OrderSide::Sell,
            amount: dec!(1),
            price: None,
            stop_price: None,
            trigger_price: None,
            info,
            timestamp: Utc::now(),
        };
        assert_eq!(order.info_decimal("stopPrice"), Some(dec!(95.5)));
        assert_eq!(order.type_token(), "stop_market");
    }
}
