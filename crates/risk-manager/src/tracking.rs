//! Per-instance strategy state.
//!
//! Strategies hold only their parameters. Everything they remember across
//! ticks lives here, keyed by symbol, and is handed to each evaluation by
//! the engine that owns the strategy instance.

use std::collections::{HashMap, VecDeque};

use crate::circuit_breaker::StrikeRecord;
use crate::reversal::StoppedPosition;
use crate::trailing_stop::TrailState;

#[derive(Debug, Clone, Default)]
pub struct Tracking {
    /// Stop-loss exits awaiting a reversal.
    pub stopped: HashMap<String, StoppedPosition>,
    /// Watermarks and claimed profit levels.
    pub trails: HashMap<String, TrailState>,
    /// Stop-loss fills in insertion order, oldest first.
    pub strikes: VecDeque<StrikeRecord>,
}

impl Tracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty() && self.trails.is_empty() && self.strikes.is_empty()
    }
}
