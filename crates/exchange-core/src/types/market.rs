//! Market data types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest traded price for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    /// 24h change in percent, when the venue reports it.
    pub change: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    pub fn new(symbol: impl Into<String>, last_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            last_price,
            change: None,
            timestamp: Utc::now(),
        }
    }
}
