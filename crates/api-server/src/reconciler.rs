//! Reconciliation loop: reads positions every tick, detects stop-loss fills,
//! runs the circuit breaker and bound strategies, and executes their actions.
//!
//! The breaker is evaluated first for every context; when it trips, its
//! close-all action runs and the rest of the tick is skipped.

use chrono::Utc;
use exchange_core::config::ReconcilerSettings;
use exchange_core::types::{Position, PositionSide};
use risk_manager::{Action, Context, StrategyEngine};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use trading_engine::{stop_loss_levels, OrderExecutor};

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between ticks.
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl From<&ReconcilerSettings> for ReconcilerConfig {
    fn from(settings: &ReconcilerSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs.max(1)),
        }
    }
}

type LegKey = (String, PositionSide);

/// What is known, beyond the position snapshot, about why armed legs left.
#[derive(Debug, Clone, Default)]
pub struct ExitEvidence {
    /// Legs the executor closed on request.
    pub closed_by_executor: HashSet<LegKey>,
    /// Stop-loss trigger levels still resting, for every symbol whose open
    /// orders were read this tick. A missing symbol means unknown.
    pub resting_stops: HashMap<String, Vec<Decimal>>,
}

/// Detects stop-loss fills by remembering positions that carry a known SL.
///
/// A fill is reported once, when the recorded level is crossed by the
/// current price, when the position shrank and lost its SL order, or when
/// the position vanished and its SL order is no longer resting. Legs the
/// executor closed itself are never reported. A level that already fired
/// is not re-armed until the position's SL changes or the position closes.
#[derive(Debug, Default)]
pub struct StopLossWatch {
    armed: HashMap<LegKey, Position>,
    fired: HashMap<LegKey, Decimal>,
}

impl StopLossWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    pub fn armed_symbols(&self) -> impl Iterator<Item = &str> {
        self.armed.keys().map(|(symbol, _)| symbol.as_str())
    }

    /// Armed legs missing from `snapshot`.
    pub fn vanished<'a>(&'a self, snapshot: &'a [Position]) -> impl Iterator<Item = &'a LegKey> {
        self.armed
            .keys()
            .filter(move |(symbol, side)| !snapshot.iter().any(|p| &p.symbol == symbol && p.side == *side))
    }

    /// Compares `snapshot` with the armed positions and returns the
    /// last-known position for every detected fill, with `last_price` set
    /// to the current price when one is known.
    pub fn detect(
        &mut self,
        snapshot: &[Position],
        prices: &HashMap<String, Decimal>,
        evidence: &ExitEvidence,
    ) -> Vec<Position> {
        let current: HashMap<LegKey, &Position> = snapshot
            .iter()
            .map(|p| ((p.symbol.clone(), p.side), p))
            .collect();

        let mut fills = Vec::new();
        for (key, armed) in std::mem::take(&mut self.armed) {
            if evidence.closed_by_executor.contains(&key) {
                debug!(symbol = %key.0, side = %key.1, "Armed leg closed on request; not a stop-loss fill");
                continue;
            }

            let live = current.get(&key).copied();
            let price = prices
                .get(&key.0)
                .copied()
                .or_else(|| live.and_then(|p| p.last_price));

            let crossed = price.is_some_and(|p| armed.stop_loss_crossed(p));
            let filled = crossed
                || match live {
                    Some(position) => position.stop_loss_price.is_none() && position.size < armed.size,
                    None => match (evidence.resting_stops.get(&key.0), armed.stop_loss_price) {
                        (Some(levels), Some(level)) if levels.contains(&level) => {
                            debug!(symbol = %key.0, side = %key.1, "Position closed with its stop still resting");
                            continue;
                        }
                        (Some(_), _) => true,
                        (None, _) => false,
                    },
                };

            if filled {
                if let Some(level) = armed.stop_loss_price {
                    self.fired.insert(key.clone(), level);
                }
                let mut hit = armed;
                hit.last_price = price.or(hit.last_price);
                fills.push(hit);
            } else {
                self.armed.insert(key, armed);
            }
        }

        self.fired.retain(|key, _| current.contains_key(key));
        for (key, position) in current {
            let Some(level) = position.stop_loss_price else {
                self.armed.remove(&key);
                continue;
            };
            if self.fired.get(&key) == Some(&level) {
                continue;
            }
            self.fired.remove(&key);
            self.armed.insert(key, position.clone());
        }

        fills
    }
}

/// Outcome of one reconciliation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub positions: usize,
    pub stop_loss_fills: usize,
    pub actions_executed: usize,
    pub actions_failed: usize,
    pub breaker_tripped: bool,
    /// Shutdown was requested before every context was evaluated.
    pub interrupted: bool,
}

pub struct Reconciler {
    config: ReconcilerConfig,
    executor: Arc<OrderExecutor>,
    engine: Arc<Mutex<StrategyEngine>>,
    watch: StopLossWatch,
    /// Set while the breaker keeps returning close-all, so the trip is
    /// logged once.
    breaker_engaged: bool,
    shutdown: watch::Receiver<bool>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        executor: Arc<OrderExecutor>,
        engine: Arc<Mutex<StrategyEngine>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            executor,
            engine,
            watch: StopLossWatch::new(),
            breaker_engaged: false,
            shutdown,
        }
    }

    /// Ticks until shutdown is signalled. A tick in progress finishes the
    /// action it is executing before the loop exits.
    pub async fn run(mut self) {
        info!(interval_ms = self.config.interval.as_millis() as u64, "Starting reconciler");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.shutdown_requested() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report != TickReport::default() {
                        debug!(?report, "Reconciler tick finished");
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || self.shutdown_requested() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let read_at = Utc::now();
        let positions = match self.executor.get_open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Could not read positions; skipping tick");
                return report;
            }
        };
        report.positions = positions.len();
        let evidence = self.exit_evidence(&positions).await;

        let bound = self.engine.lock().await.bound_symbols();
        let symbols: BTreeSet<String> = positions
            .iter()
            .map(|p| p.symbol.clone())
            .chain(self.watch.armed_symbols().map(str::to_string))
            .chain(bound)
            .collect();

        let mut prices = HashMap::new();
        for symbol in &symbols {
            match self.executor.gateway().fetch_ticker(symbol).await {
                Ok(ticker) => {
                    prices.insert(symbol.clone(), ticker.last_price);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Ticker unavailable"),
            }
        }

        let fills = self.watch.detect(&positions, &prices, &evidence);
        report.stop_loss_fills = fills.len();

        let open: HashSet<LegKey> = positions.iter().map(|p| (p.symbol.clone(), p.side)).collect();
        self.executor.acknowledge_closed(&open, read_at);

        let nothing_open = positions.is_empty();
        let contexts = build_contexts(&symbols, positions, fills, &prices);

        let mut breaker_seen = false;
        for mut ctx in contexts {
            if self.shutdown_requested() {
                report.interrupted = true;
                break;
            }

            let (breaker_action, bound_action) = {
                let mut engine = self.engine.lock().await;
                match engine.evaluate_breaker(&mut ctx) {
                    Some(action) => (Some(action), None),
                    None => (None, engine.evaluate_bound(&mut ctx)),
                }
            };

            if let Some(action) = breaker_action {
                breaker_seen = true;
                report.breaker_tripped = true;
                if !self.breaker_engaged {
                    error!(symbol = %ctx.symbol, "Circuit breaker tripped; closing all positions");
                    self.breaker_engaged = true;
                }
                if !nothing_open {
                    self.run_action(&action, &mut report).await;
                }
                break;
            }
            if let Some(action) = bound_action {
                self.run_action(&action, &mut report).await;
            }
        }

        if !breaker_seen && !report.interrupted && self.breaker_engaged {
            info!("Circuit breaker released");
            self.breaker_engaged = false;
        }

        report
    }

    /// Reads the open orders of every symbol with a vanished armed leg the
    /// executor did not close. Taken after the position read so a close
    /// racing the read is still attributed to the executor.
    async fn exit_evidence(&self, positions: &[Position]) -> ExitEvidence {
        let closed_by_executor = self.executor.closed_legs();
        let symbols: BTreeSet<String> = self
            .watch
            .vanished(positions)
            .filter(|leg| !closed_by_executor.contains(*leg))
            .map(|(symbol, _)| symbol.clone())
            .collect();

        let mut resting_stops = HashMap::new();
        for symbol in symbols {
            match self.executor.gateway().fetch_open_orders(Some(&symbol)).await {
                Ok(orders) => {
                    resting_stops.insert(symbol, stop_loss_levels(&orders));
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Open orders unavailable; stop-loss check deferred"),
            }
        }

        ExitEvidence {
            closed_by_executor,
            resting_stops,
        }
    }

    async fn run_action(&self, action: &Action, report: &mut TickReport) {
        if self.executor.execute(action).await {
            report.actions_executed += 1;
        } else {
            report.actions_failed += 1;
            warn!(action = action.kind(), symbol = ?action.symbol(), "Strategy action failed; will retry from fresh state");
        }
    }
}

/// One context per open leg, one per detected fill, and one without a
/// position for every other symbol (bound, or stopped out without a fill).
fn build_contexts(
    symbols: &BTreeSet<String>,
    positions: Vec<Position>,
    fills: Vec<Position>,
    prices: &HashMap<String, Decimal>,
) -> Vec<Context> {
    let now = Utc::now();
    let priced = |ctx: Context| match prices.get(&ctx.symbol) {
        Some(price) => ctx.with_price(*price),
        None => ctx,
    };

    let mut contexts = Vec::new();
    for symbol in symbols {
        let mut seen = false;
        for hit in fills.iter().filter(|p| &p.symbol == symbol) {
            info!(symbol = %symbol, side = %hit.side, stop_loss = ?hit.stop_loss_price, "Stop-loss fill detected");
            contexts.push(priced(Context::new(symbol.clone(), Some(hit.clone()), now).with_stop_loss_hit()));
            seen = true;
        }
        for position in positions.iter().filter(|p| &p.symbol == symbol) {
            let filled_leg = fills.iter().any(|f| f.symbol == position.symbol && f.side == position.side);
            if !filled_leg {
                contexts.push(priced(Context::new(symbol.clone(), Some(position.clone()), now)));
            }
            seen = true;
        }
        if !seen {
            contexts.push(priced(Context::new(symbol.clone(), None, now)));
        }
    }
    contexts
}

/// Spawns the reconciler as a background task.
pub fn spawn_reconciler(
    config: ReconcilerConfig,
    executor: Arc<OrderExecutor>,
    engine: Arc<Mutex<StrategyEngine>>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let reconciler = Reconciler::new(config, executor, engine, shutdown);
    let handle = tokio::spawn(reconciler.run());
    info!("Reconciler spawned as background task");
    handle
}
