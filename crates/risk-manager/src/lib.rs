//! Risk Manager
//!
//! Stop-loss reaction strategies and the three-strike circuit breaker that
//! guards every symbol.

pub mod circuit_breaker;
pub mod context;
pub mod engine;
pub mod reversal;
pub mod strategy;
pub mod tracking;
pub mod trailing_stop;

use thiserror::Error;

pub use circuit_breaker::{StrikeEvent, StrikeRecord, StrikeStatus, ThreeStrike};
pub use context::{Action, Context};
pub use engine::{Binding, BindingInfo, StrategyEngine};
pub use reversal::{MarketReversal, StopAndReverse, StoppedPosition};
pub use strategy::{Strategy, StrategyInfo, StrategyKind};
pub use tracking::Tracking;
pub use trailing_stop::{ProfitLevel, TrailState, TrailingStopWithPartialProfits};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid parameters for {strategy}: {source}")]
    InvalidParams {
        strategy: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
