//! Trading Engine
//!
//! Order execution for margin futures: entries, closes, protective orders
//! with exchange fallbacks, and position snapshots with inferred SL/TP.

pub mod conditional;
pub mod error;
pub mod executor;
pub mod position_reader;

pub use conditional::{place_conditional, ConditionalKind, ConditionalOrder, FallbackFailure, PlacedConditional};
pub use error::{ExecutionError, Result};
pub use executor::{ExecutorConfig, OrderExecutor, PlaceOrderRequest, TrackedOrder};
pub use position_reader::{classify_protection, stop_loss_levels, PositionReader, ProtectionLevels};
