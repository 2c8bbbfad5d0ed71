//! Trailing stop with staged partial profit-taking.

use exchange_core::types::PositionSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::{Action, Context};
use crate::tracking::Tracking;

/// Close `amount_percentage` of the position once profit reaches `percentage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitLevel {
    pub percentage: Decimal,
    pub amount_percentage: Decimal,
}

impl ProfitLevel {
    pub fn new(percentage: Decimal, amount_percentage: Decimal) -> Self {
        Self {
            percentage,
            amount_percentage,
        }
    }
}

/// Watermark and claimed levels for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailState {
    pub side: PositionSide,
    /// Highest price seen for longs, lowest for shorts.
    pub watermark: Decimal,
    /// Percentages of levels already taken.
    pub taken: Vec<Decimal>,
}

impl TrailState {
    fn observe(&mut self, price: Decimal) {
        self.watermark = match self.side {
            PositionSide::Long => self.watermark.max(price),
            PositionSide::Short => self.watermark.min(price),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopWithPartialProfits {
    pub trailing_distance_pct: Decimal,
    pub profit_levels: Vec<ProfitLevel>,
}

impl Default for TrailingStopWithPartialProfits {
    fn default() -> Self {
        Self {
            trailing_distance_pct: Decimal::ONE,
            profit_levels: vec![
                ProfitLevel::new(Decimal::from(5), Decimal::from(20)),
                ProfitLevel::new(Decimal::from(10), Decimal::from(30)),
                ProfitLevel::new(Decimal::from(20), Decimal::from(50)),
            ],
        }
    }
}

impl TrailingStopWithPartialProfits {
    pub fn description(&self) -> String {
        format!(
            "Uses {}% trailing stop and takes profits at specified levels",
            self.trailing_distance_pct.normalize()
        )
    }

    /// Stop price trailing the watermark.
    pub fn trigger_price(&self, state: &TrailState) -> Decimal {
        let distance = self.trailing_distance_pct / Decimal::ONE_HUNDRED;
        match state.side {
            PositionSide::Long => state.watermark * (Decimal::ONE - distance),
            PositionSide::Short => state.watermark * (Decimal::ONE + distance),
        }
    }

    pub fn should_execute(&self, ctx: &mut Context, tracking: &mut Tracking) -> bool {
        let Some(position) = ctx.position.as_ref() else {
            // Position gone: the next one starts from a fresh watermark.
            tracking.trails.remove(&ctx.symbol);
            return false;
        };
        let Some(price) = ctx.price() else {
            return false;
        };

        let state = tracking
            .trails
            .entry(ctx.symbol.clone())
            .or_insert_with(|| TrailState {
                side: position.side,
                watermark: price,
                taken: Vec::new(),
            });
        if state.side != position.side {
            *state = TrailState {
                side: position.side,
                watermark: price,
                taken: Vec::new(),
            };
        }
        state.observe(price);

        let trigger = self.trigger_price(state);
        let stop_hit = match state.side {
            PositionSide::Long => price <= trigger,
            PositionSide::Short => price >= trigger,
        };
        if stop_hit {
            debug!(symbol = %ctx.symbol, price = %price, trigger = %trigger, "Trailing stop crossed");
            ctx.trailing_stop_hit = true;
            return true;
        }

        let Some(profit_pct) = position.profit_pct(price) else {
            return false;
        };
        let Some(level) = self
            .profit_levels
            .iter()
            .find(|level| profit_pct >= level.percentage && !state.taken.contains(&level.percentage))
        else {
            return false;
        };
        state.taken.push(level.percentage);

        ctx.partial_profit = Some(Action::PartialClose {
            symbol: ctx.symbol.clone(),
            amount: position.size * level.amount_percentage / Decimal::ONE_HUNDRED,
            profit_pct: level.percentage,
            comment: format!(
                "Taking {}% profit at {}% gain",
                level.amount_percentage.normalize(),
                level.percentage.normalize()
            ),
        });
        true
    }

    pub fn execute(&self, ctx: &Context, tracking: &mut Tracking) -> Option<Action> {
        if ctx.trailing_stop_hit {
            tracking.trails.remove(&ctx.symbol);
            info!(symbol = %ctx.symbol, "Trailing stop triggered");
            return Some(Action::ClosePosition {
                symbol: ctx.symbol.clone(),
                comment: "Trailing stop triggered".to_string(),
            });
        }
        ctx.partial_profit.clone()
    }
}
