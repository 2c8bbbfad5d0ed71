//! API request handlers.

pub mod account;
pub mod health;
pub mod positions;
pub mod risk;
pub mod strategies;
pub mod trading;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Outcome of an operation whose failure is reported, not raised.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
}

impl OperationResponse {
    pub fn outcome(success: bool, done: impl Into<String>, failed: impl Into<String>) -> Self {
        Self {
            success,
            message: if success { done.into() } else { failed.into() },
        }
    }
}
