//! API Server
//!
//! HTTP API and reconciliation service for the futures guard.
//!
//! # Features
//!
//! - **REST API**: positions, orders, SL/TP, position mode, leverage,
//!   strategy bindings and breaker status
//! - **Reconciler**: periodic stop-loss fill detection feeding the
//!   circuit breaker and bound strategies
//! - **OpenAPI**: Auto-generated Swagger documentation
//!
//! # Example
//!
//! ```ignore
//! use api_server::{ApiServer, ServerConfig};
//!
//! let server = ApiServer::new(ServerConfig::from_env(), &config);
//! server.run(shutdown_signal()).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod reconciler;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use reconciler::{spawn_reconciler, ExitEvidence, Reconciler, ReconcilerConfig, StopLossWatch, TickReport};
pub use routes::create_router;
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use exchange_core::config::Config;
use std::future::Future;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for all origins (development only).
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_permissive: true,
        }
    }
}

impl ServerConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            // PORT first (container platforms), then API_PORT
            port: std::env::var("PORT")
                .or_else(|_| std::env::var("API_PORT"))
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            cors_permissive: std::env::var("CORS_PERMISSIVE")
                .map(|v| v == "true")
                .unwrap_or(true),
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// The API server together with its reconciler.
pub struct ApiServer {
    config: ServerConfig,
    reconciler: ReconcilerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a server backed by the paper exchange described in `app_config`.
    pub fn new(config: ServerConfig, app_config: &Config) -> Self {
        let gateway = AppState::paper_gateway(app_config);
        Self::with_state(
            config,
            ReconcilerConfig::from(&app_config.reconciler),
            AppState::with_gateway(gateway, app_config),
        )
    }

    pub fn with_state(config: ServerConfig, reconciler: ReconcilerConfig, state: AppState) -> Self {
        Self {
            config,
            reconciler,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Serve until `shutdown` resolves, then stop the reconciler and wait
    /// for its current action to finish.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let reconciler = spawn_reconciler(
            self.reconciler.clone(),
            self.state.executor.clone(),
            self.state.engine.clone(),
            stop_rx,
        );

        let router = create_router(self.state.clone())
            .layer(
                TraceLayer::new_for_http()
                    .on_request(|request: &Request<_>, _span: &tracing::Span| {
                        tracing::info!(
                            method = %request.method(),
                            uri = %request.uri(),
                            "Incoming request"
                        );
                    })
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG))
                    .on_failure(
                        |error: tower_http::classify::ServerErrorsFailureClass,
                         latency: std::time::Duration,
                         _span: &tracing::Span| {
                            tracing::error!(
                                error = %error,
                                latency_ms = latency.as_millis(),
                                "Request failed"
                            );
                        },
                    ),
            )
            .layer(DefaultBodyLimit::max(64 * 1024))
            .layer(if self.config.cors_permissive {
                CorsLayer::permissive()
            } else {
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            });

        let addr = self.config.socket_addr()?;
        info!(address = %addr, "Starting API server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutdown signal received");
                if stop_tx.send(true).is_err() {
                    warn!("Reconciler already stopped");
                }
            })
            .await?;

        reconciler.await?;
        info!("API server stopped");
        Ok(())
    }
}
