//! Exchange gateway contract and implementations.

pub mod paper;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::types::{ExchangeOrder, ExchangePosition, OrderRequest, PositionMode, Ticker};

pub use paper::PaperExchange;

/// Narrow interface to a margin futures exchange.
///
/// Implementations are treated as unreliable remote services: any call may
/// fail, time out, or be rejected with an exchange-specific error code.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn fetch_ticker(&self, symbol: &str) -> GatewayResult<Ticker>;

    /// Lists positions for `symbols`, or for the whole account when empty.
    async fn fetch_positions(&self, symbols: &[String]) -> GatewayResult<Vec<ExchangePosition>>;

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> GatewayResult<Vec<ExchangeOrder>>;

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<ExchangeOrder>;

    /// Submits raw parameters to the low-level order endpoint, bypassing
    /// order-type normalization.
    async fn submit_direct_order(
        &self,
        params: &BTreeMap<String, String>,
    ) -> GatewayResult<ExchangeOrder>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> GatewayResult<()>;

    async fn set_leverage(&self, leverage: u32, symbol: &str) -> GatewayResult<()>;

    async fn position_mode(&self) -> GatewayResult<PositionMode>;

    async fn set_position_mode(&self, mode: PositionMode) -> GatewayResult<()>;
}

/// Gateway decorator that bounds every call with a timeout.
pub struct GuardedGateway {
    inner: Arc<dyn ExchangeGateway>,
    timeout: Duration,
}

impl GuardedGateway {
    pub fn new(inner: Arc<dyn ExchangeGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T, F>(&self, operation: &'static str, call: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Gateway call timed out");
                Err(GatewayError::Timeout {
                    operation,
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for GuardedGateway {
    async fn fetch_ticker(&self, symbol: &str) -> GatewayResult<Ticker> {
        self.guard("fetch_ticker", self.inner.fetch_ticker(symbol)).await
    }

    async fn fetch_positions(&self, symbols: &[String]) -> GatewayResult<Vec<ExchangePosition>> {
        self.guard("fetch_positions", self.inner.fetch_positions(symbols))
            .await
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> GatewayResult<Vec<ExchangeOrder>> {
        self.guard("fetch_open_orders", self.inner.fetch_open_orders(symbol))
            .await
    }

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<ExchangeOrder> {
        self.guard("create_order", self.inner.create_order(request))
            .await
    }

    async fn submit_direct_order(
        &self,
        params: &BTreeMap<String, String>,
    ) -> GatewayResult<ExchangeOrder> {
        self.guard("submit_direct_order", self.inner.submit_direct_order(params))
            .await
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> GatewayResult<()> {
        self.guard("cancel_order", self.inner.cancel_order(order_id, symbol))
            .await
    }

    async fn set_leverage(&self, leverage: u32, symbol: &str) -> GatewayResult<()> {
        self.guard("set_leverage", self.inner.set_leverage(leverage, symbol))
            .await
    }

    async fn position_mode(&self) -> GatewayResult<PositionMode> {
        self.guard("position_mode", self.inner.position_mode()).await
    }

    async fn set_position_mode(&self, mode: PositionMode) -> GatewayResult<()> {
        self.guard("set_position_mode", self.inner.set_position_mode(mode))
            .await
    }
}
