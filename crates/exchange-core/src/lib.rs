//! Futures Guard Core Library
//!
//! Shared types, the exchange gateway contract, and configuration for the
//! Futures Guard system.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, GatewayError, GatewayResult, Result};
