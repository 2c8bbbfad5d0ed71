//! Three-strike circuit breaker.
//!
//! Counts stop-loss fills across every symbol in a trailing time window
//! and closes all positions once the count reaches the strike limit.

use chrono::{DateTime, Duration, Utc};
use exchange_core::types::PositionSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::context::{Action, Context};
use crate::tracking::Tracking;

/// A recorded stop-loss fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub side: Option<PositionSide>,
    pub size: Decimal,
}

/// Strike as reported by [`ThreeStrike::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeEvent {
    pub symbol: String,
    pub side: Option<PositionSide>,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub age_secs: i64,
}

/// Current breaker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeStatus {
    pub count: usize,
    pub limit: usize,
    /// Seconds until the oldest strike leaves the window.
    pub window_remaining_secs: Option<i64>,
    pub events: Vec<StrikeEvent>,
}

impl StrikeStatus {
    pub fn tripped(&self) -> bool {
        self.count >= self.limit
    }
}

/// Breaker parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreeStrike {
    /// Stop-loss fills within the window that trip the breaker.
    pub strike_limit: usize,
    /// Window length in seconds.
    pub time_window: i64,
}

impl Default for ThreeStrike {
    fn default() -> Self {
        Self {
            strike_limit: 3,
            time_window: 4 * 60 * 60,
        }
    }
}

impl ThreeStrike {
    pub fn new(strike_limit: usize, time_window: Duration) -> Self {
        Self {
            strike_limit,
            time_window: time_window.num_seconds(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.time_window)
    }

    pub fn description(&self) -> String {
        let hours = (Decimal::from(self.time_window) / Decimal::from(3600)).normalize();
        format!(
            "Closes all positions after {} stop losses within {} hours",
            self.strike_limit, hours
        )
    }

    /// Drops strikes whose age is at least the window.
    fn prune(&self, strikes: &mut VecDeque<StrikeRecord>, now: DateTime<Utc>) {
        let window = self.window();
        while strikes
            .front()
            .is_some_and(|oldest| now - oldest.timestamp >= window)
        {
            strikes.pop_front();
        }
    }

    /// Records a strike when the context reports a stop-loss fill, prunes
    /// expired strikes, and reports whether the limit is reached.
    pub fn should_execute(&self, ctx: &Context, tracking: &mut Tracking) -> bool {
        if ctx.stop_loss_hit {
            tracking.strikes.push_back(StrikeRecord {
                symbol: ctx.symbol.clone(),
                timestamp: ctx.now,
                side: ctx.position.as_ref().map(|p| p.side),
                size: ctx.position.as_ref().map(|p| p.size).unwrap_or_default(),
            });
            info!(
                symbol = %ctx.symbol,
                strikes = tracking.strikes.len(),
                "Stop loss recorded against breaker"
            );
        }

        self.prune(&mut tracking.strikes, ctx.now);
        tracking.strikes.len() >= self.strike_limit
    }

    pub fn execute(&self, _ctx: &Context, tracking: &Tracking) -> Option<Action> {
        let strikes = tracking.strikes.len();
        debug!(strikes, limit = self.strike_limit, "Three-strike limit reached");
        Some(Action::CloseAllPositions {
            comment: format!(
                "Three Strike Protection: {} stop losses triggered within time window",
                strikes
            ),
        })
    }

    pub fn status(&self, tracking: &Tracking, now: DateTime<Utc>) -> StrikeStatus {
        let window = self.window();
        let events: Vec<StrikeEvent> = tracking
            .strikes
            .iter()
            .filter(|strike| now - strike.timestamp < window)
            .map(|strike| StrikeEvent {
                symbol: strike.symbol.clone(),
                side: strike.side,
                size: strike.size,
                timestamp: strike.timestamp,
                age_secs: (now - strike.timestamp).num_seconds(),
            })
            .collect();

        StrikeStatus {
            count: events.len(),
            limit: self.strike_limit,
            window_remaining_secs: events
                .first()
                .map(|oldest| (window - (now - oldest.timestamp)).num_seconds()),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::types::Position;
    use rust_decimal_macros::dec;

    fn stop_hit(symbol: &str, at: DateTime<Utc>) -> Context {
        let position = Position::new(symbol, PositionSide::Long, dec!(1), dec!(100));
        Context::new(symbol, Some(position), at).with_stop_loss_hit()
    }

    #[test]
    fn test_trips_exactly_at_limit() {
        let breaker = ThreeStrike::default();
        let mut tracking = Tracking::new();
        let start = Utc::now();

        assert!(!breaker.should_execute(&stop_hit("BTC/USDT:USDT", start), &mut tracking));
        assert!(!breaker.should_execute(
            &stop_hit("ETH/USDT:USDT", start + Duration::minutes(10)),
            &mut tracking
        ));
        assert!(breaker.should_execute(
            &stop_hit("SOL/USDT:USDT", start + Duration::minutes(20)),
            &mut tracking
        ));

        let action = breaker
            .execute(&stop_hit("SOL/USDT:USDT", start), &tracking)
            .unwrap();
        assert_eq!(
            action,
            Action::CloseAllPositions {
                comment: "Three Strike Protection: 3 stop losses triggered within time window"
                    .to_string()
            }
        );
    }

    #[test]
    fn test_event_at_window_age_is_excluded() {
        let breaker = ThreeStrike::new(2, Duration::hours(4));
        let mut tracking = Tracking::new();
        let start = Utc::now();

        breaker.should_execute(&stop_hit("BTC/USDT:USDT", start), &mut tracking);

        // Just inside the window: both strikes count.
        let almost = start + Duration::hours(4) - Duration::milliseconds(1);
        let mut inside = tracking.clone();
        assert!(breaker.should_execute(&stop_hit("ETH/USDT:USDT", almost), &mut inside));

        // Exactly at the window age the first strike has expired.
        let at_window = start + Duration::hours(4);
        assert!(!breaker.should_execute(&stop_hit("ETH/USDT:USDT", at_window), &mut tracking));
        assert_eq!(tracking.strikes.len(), 1);
        assert_eq!(tracking.strikes[0].symbol, "ETH/USDT:USDT");
    }

    #[test]
    fn test_quiet_contexts_only_prune() {
        let breaker = ThreeStrike::new(1, Duration::hours(1));
        let mut tracking = Tracking::new();
        let start = Utc::now();

        assert!(breaker.should_execute(&stop_hit("BTC/USDT:USDT", start), &mut tracking));

        let quiet = Context::new("BTC/USDT:USDT", None, start + Duration::minutes(30));
        assert!(breaker.should_execute(&quiet, &mut tracking));

        let later = Context::new("BTC/USDT:USDT", None, start + Duration::hours(2));
        assert!(!breaker.should_execute(&later, &mut tracking));
        assert!(tracking.strikes.is_empty());
    }

    #[test]
    fn test_status_reports_window() {
        let breaker = ThreeStrike::default();
        let mut tracking = Tracking::new();
        let start = Utc::now();

        breaker.should_execute(&stop_hit("BTC/USDT:USDT", start), &mut tracking);
        let status = breaker.status(&tracking, start + Duration::hours(1));

        assert_eq!(status.count, 1);
        assert_eq!(status.limit, 3);
        assert!(!status.tripped());
        assert_eq!(status.window_remaining_secs, Some(3 * 60 * 60));
        assert_eq!(status.events[0].age_secs, 3600);
        assert_eq!(status.events[0].side, Some(PositionSide::Long));
    }

    #[test]
    fn test_description() {
        assert_eq!(
            ThreeStrike::default().description(),
            "Closes all positions after 3 stop losses within 4 hours"
        );
        assert_eq!(
            ThreeStrike::new(2, Duration::minutes(90)).description(),
            "Closes all positions after 2 stop losses within 1.5 hours"
        );
    }
}
