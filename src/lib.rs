//! Futures Guard: stop-loss reaction strategies and reliable order
//! execution for margin futures.
//!
//! This root crate re-exports the workspace members for benchmarks and
//! integration tests. For actual functionality, use the individual crates:
//!
//! - `exchange-core`: Domain types, the exchange gateway trait, paper exchange, configuration
//! - `risk-manager`: Strategies, the three-strike breaker, the strategy engine
//! - `trading-engine`: Order execution, conditional order fallbacks, position snapshots
//! - `api-server`: HTTP API and the reconciliation loop

pub use api_server as api;
pub use exchange_core as core;
pub use risk_manager as risk;
pub use trading_engine as trading;
