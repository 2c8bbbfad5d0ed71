//! Error types for order execution.

use exchange_core::GatewayError;
use thiserror::Error;

use crate::conditional::FallbackFailure;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No open position for {0}")]
    NoPosition(String),

    #[error("Invalid order request: {0}")]
    InvalidRequest(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    FallbackExhausted(#[from] FallbackFailure),

    #[error("Order {0} not found locally or among open orders")]
    OrderNotFound(String),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
