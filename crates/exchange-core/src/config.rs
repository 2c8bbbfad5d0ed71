//! Configuration management for the Futures Guard system.
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file
//! (`guard.toml`, or the path in `GUARD_CONFIG`), then `GUARD_`-prefixed
//! environment variables with `__` between nested keys, e.g.
//! `GUARD_RECONCILER__INTERVAL_SECS=10`.

use crate::Result;
use config::{Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "guard.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewaySettings,
    pub executor: ExecutorSettings,
    pub reconciler: ReconcilerSettings,
    pub paper: PaperSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Upper bound on any single gateway call.
    pub call_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
        }
    }
}

impl GatewaySettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// How long to wait for a freshly filled position to become readable.
    pub settle_timeout_ms: u64,
    pub settle_poll_ms: u64,
    /// Leverage applied to entries that do not request one.
    pub default_leverage: Option<u32>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            settle_timeout_ms: 5_000,
            settle_poll_ms: 250,
            default_leverage: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    pub interval_secs: u64,
    /// Stop-loss fills within the window that trip the breaker.
    pub strike_limit: usize,
    pub strike_window_secs: i64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            strike_limit: 3,
            strike_window_secs: 4 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperMarket {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperSettings {
    pub hedge_mode: bool,
    pub markets: Vec<PaperMarket>,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            hedge_mode: false,
            markets: vec![
                PaperMarket {
                    symbol: "BTC/USDT:USDT".to_string(),
                    price: Decimal::new(60_000, 0),
                },
                PaperMarket {
                    symbol: "ETH/USDT:USDT".to_string(),
                    price: Decimal::new(3_000, 0),
                },
            ],
        }
    }
}

impl Config {
    /// Load configuration from the default file location and environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("GUARD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(path)
    }

    /// Load configuration from a specific file, which may be absent.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.gateway.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconciler.strike_limit, 3);
        assert_eq!(config.reconciler.strike_window_secs, 14_400);
        assert_eq!(config.paper.markets.len(), 2);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("guard-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[executor]
settle_timeout_ms = 1500
default_leverage = 10

[paper]
hedge_mode = true
markets = [{ symbol = "SOL/USDT:USDT", price = 150.5 }]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.executor.settle_timeout_ms, 1500);
        assert_eq!(config.executor.settle_poll_ms, 250);
        assert_eq!(config.executor.default_leverage, Some(10));
        assert!(config.paper.hedge_mode);
        assert_eq!(config.paper.markets[0].symbol, "SOL/USDT:USDT");
        assert_eq!(config.paper.markets[0].price, Decimal::new(1505, 1));
    }
}
