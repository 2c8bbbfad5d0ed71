//! Position types for margin futures accounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::order::OrderSide;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Order side that reduces or closes a position on this side.
    pub fn closing_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }

    /// Order side that opens or adds to a position on this side.
    pub fn opening_side(self) -> OrderSide {
        self.closing_side().opposite()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(format!("unknown position side: {other}")),
        }
    }
}

/// Account position mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// One net position per symbol; closing orders use `reduceOnly`.
    OneWay,
    /// Long and short may coexist; every order carries `positionSide`.
    Hedge,
}

impl PositionMode {
    pub fn from_hedge(hedge: bool) -> Self {
        if hedge {
            Self::Hedge
        } else {
            Self::OneWay
        }
    }

    pub fn is_hedge(self) -> bool {
        matches!(self, Self::Hedge)
    }
}

/// Position row as listed by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub contracts: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub mark_price: Option<Decimal>,
}

/// Normalized open position.
///
/// Rebuilt from exchange state on every reconciliation tick. A position
/// with zero size never reaches the strategy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub last_price: Option<Decimal>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, side: PositionSide, size: Decimal, entry_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            entry_price,
            unrealized_pnl: Decimal::ZERO,
            stop_loss_price: None,
            take_profit_price: None,
            last_price: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.size > Decimal::ZERO
    }

    /// Profit in percent at `price`, sign-adjusted by side.
    pub fn profit_pct(&self, price: Decimal) -> Option<Decimal> {
        if self.entry_price.is_zero() || price.is_zero() {
            return None;
        }
        let ratio = match self.side {
            PositionSide::Long => price / self.entry_price,
            PositionSide::Short => self.entry_price / price,
        };
        Some((ratio - Decimal::ONE) * Decimal::ONE_HUNDRED)
    }

    /// True when `price` is at or through the stop-loss level.
    pub fn stop_loss_crossed(&self, price: Decimal) -> bool {
        match (self.side, self.stop_loss_price) {
            (PositionSide::Long, Some(sl)) => price <= sl,
            (PositionSide::Short, Some(sl)) => price >= sl,
            (_, None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_profit_pct_by_side() {
        let long = Position::new("BTC/USDT:USDT", PositionSide::Long, dec!(1), dec!(100));
        assert_eq!(long.profit_pct(dec!(105)), Some(dec!(5)));

        let short = Position::new("BTC/USDT:USDT", PositionSide::Short, dec!(1), dec!(100));
        assert_eq!(short.profit_pct(dec!(80)), Some(dec!(25)));
        assert_eq!(short.profit_pct(Decimal::ZERO), None);
    }

    #[test]
    fn test_stop_loss_crossed() {
        let mut long = Position::new("ETH/USDT:USDT", PositionSide::Long, dec!(2), dec!(100));
        assert!(!long.stop_loss_crossed(dec!(90)));

        long.stop_loss_price = Some(dec!(95));
        assert!(long.stop_loss_crossed(dec!(95)));
        assert!(!long.stop_loss_crossed(dec!(95.01)));

        let mut short = Position::new("ETH/USDT:USDT", PositionSide::Short, dec!(2), dec!(100));
        short.stop_loss_price = Some(dec!(105));
        assert!(short.stop_loss_crossed(dec!(105.5)));
        assert!(!short.stop_loss_crossed(dec!(104)));
    }

    #[test]
    fn test_sides() {
        assert_eq!(PositionSide::Long.closing_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.opening_side(), OrderSide::Sell);
        assert_eq!("SHORT".parse::<PositionSide>(), Ok(PositionSide::Short));
    }
}
