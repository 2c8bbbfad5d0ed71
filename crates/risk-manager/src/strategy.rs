//! Strategy variants, factory and catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::circuit_breaker::ThreeStrike;
use crate::context::{Action, Context};
use crate::reversal::{MarketReversal, StopAndReverse};
use crate::tracking::Tracking;
use crate::trailing_stop::TrailingStopWithPartialProfits;
use crate::{EngineError, Result};

/// Name under which each strategy is created and listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "MarketReversalStrategy")]
    MarketReversal,
    #[serde(rename = "ThreeStrikeStrategy")]
    ThreeStrike,
    #[serde(rename = "TrailingStopWithPartialProfits")]
    TrailingStopWithPartialProfits,
    #[serde(rename = "StopAndReverseStrategy")]
    StopAndReverse,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        Self::MarketReversal,
        Self::ThreeStrike,
        Self::TrailingStopWithPartialProfits,
        Self::StopAndReverse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::MarketReversal => "MarketReversalStrategy",
            Self::ThreeStrike => "ThreeStrikeStrategy",
            Self::TrailingStopWithPartialProfits => "TrailingStopWithPartialProfits",
            Self::StopAndReverse => "StopAndReverseStrategy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| EngineError::UnknownStrategy(s.to_string()))
    }
}

/// A configured strategy. Per-symbol memory lives in [`Tracking`].
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    MarketReversal(MarketReversal),
    ThreeStrike(ThreeStrike),
    TrailingStopWithPartialProfits(TrailingStopWithPartialProfits),
    StopAndReverse(StopAndReverse),
}

/// Catalog entry describing one strategy with its default parameters.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub name: &'static str,
    pub description: String,
    pub default_params: Value,
}

impl Strategy {
    /// Builds a strategy from its name and parameters. Missing parameters
    /// take their defaults.
    pub fn from_params(kind: StrategyKind, params: &Value) -> Result<Self> {
        // Treat null as "all defaults".
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params.clone()
        };
        let invalid = |source: serde_json::Error| EngineError::InvalidParams {
            strategy: kind.name(),
            source,
        };

        Ok(match kind {
            StrategyKind::MarketReversal => {
                Self::MarketReversal(serde_json::from_value(params).map_err(invalid)?)
            }
            StrategyKind::ThreeStrike => {
                Self::ThreeStrike(serde_json::from_value(params).map_err(invalid)?)
            }
            StrategyKind::TrailingStopWithPartialProfits => {
                Self::TrailingStopWithPartialProfits(serde_json::from_value(params).map_err(invalid)?)
            }
            StrategyKind::StopAndReverse => {
                Self::StopAndReverse(serde_json::from_value(params).map_err(invalid)?)
            }
        })
    }

    /// Factory by name. Unknown names and unusable parameters yield `None`.
    pub fn create(name: &str, params: &Value) -> Option<Self> {
        let built = name
            .parse::<StrategyKind>()
            .and_then(|kind| Self::from_params(kind, params));
        match built {
            Ok(strategy) => Some(strategy),
            Err(e) => {
                warn!(strategy = name, error = %e, "Strategy not created");
                None
            }
        }
    }

    pub fn default_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::MarketReversal => Self::MarketReversal(MarketReversal::default()),
            StrategyKind::ThreeStrike => Self::ThreeStrike(ThreeStrike::default()),
            StrategyKind::TrailingStopWithPartialProfits => {
                Self::TrailingStopWithPartialProfits(TrailingStopWithPartialProfits::default())
            }
            StrategyKind::StopAndReverse => Self::StopAndReverse(StopAndReverse::default()),
        }
    }

    /// Every available strategy with its default parameters.
    pub fn catalog() -> Vec<StrategyInfo> {
        StrategyKind::ALL
            .into_iter()
            .map(|kind| {
                let strategy = Self::default_for(kind);
                StrategyInfo {
                    name: kind.name(),
                    description: strategy.description(),
                    default_params: strategy.params(),
                }
            })
            .collect()
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::MarketReversal(_) => StrategyKind::MarketReversal,
            Self::ThreeStrike(_) => StrategyKind::ThreeStrike,
            Self::TrailingStopWithPartialProfits(_) => StrategyKind::TrailingStopWithPartialProfits,
            Self::StopAndReverse(_) => StrategyKind::StopAndReverse,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn description(&self) -> String {
        match self {
            Self::MarketReversal(s) => s.description(),
            Self::ThreeStrike(s) => s.description(),
            Self::TrailingStopWithPartialProfits(s) => s.description(),
            Self::StopAndReverse(s) => s.description(),
        }
    }

    /// Effective parameters, defaults included.
    pub fn params(&self) -> Value {
        let params = match self {
            Self::MarketReversal(s) => serde_json::to_value(s),
            Self::ThreeStrike(s) => serde_json::to_value(s),
            Self::TrailingStopWithPartialProfits(s) => serde_json::to_value(s),
            Self::StopAndReverse(s) => serde_json::to_value(s),
        };
        params.unwrap_or(Value::Null)
    }

    /// May mutate `tracking` and annotate `ctx`; call at most once per context.
    pub fn should_execute(&self, ctx: &mut Context, tracking: &mut Tracking) -> bool {
        match self {
            Self::MarketReversal(s) => s.should_execute(ctx, tracking),
            Self::ThreeStrike(s) => s.should_execute(ctx, tracking),
            Self::TrailingStopWithPartialProfits(s) => s.should_execute(ctx, tracking),
            Self::StopAndReverse(s) => s.should_execute(ctx, tracking),
        }
    }

    /// Only meaningful right after `should_execute` returned true for `ctx`.
    pub fn execute(&self, ctx: &Context, tracking: &mut Tracking) -> Option<Action> {
        match self {
            Self::MarketReversal(s) => s.execute(ctx, tracking),
            Self::ThreeStrike(s) => s.execute(ctx, tracking),
            Self::TrailingStopWithPartialProfits(s) => s.execute(ctx, tracking),
            Self::StopAndReverse(s) => s.execute(ctx, tracking),
        }
    }

    /// Runs `should_execute` then `execute`.
    pub fn evaluate(&self, ctx: &mut Context, tracking: &mut Tracking) -> Option<Action> {
        if self.should_execute(ctx, tracking) {
            self.execute(ctx, tracking)
        } else {
            None
        }
    }
}
