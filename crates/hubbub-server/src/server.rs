use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use hubbub_core::{DefaultCryptoFunctions, Hub, HubError, InMemorySubscriptionStore};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::{config::AppConfig, handlers};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/hub", post(handlers::hub_request))
        .route("/hub/publish", post(handlers::publish))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(DefaultBodyLimit::max(cfg.server.body_limit_bytes))
}

/// Build a hub with the in-memory store and queue.
pub fn build_hub(cfg: &AppConfig) -> Result<Arc<Hub>, HubError> {
    let options = cfg.hub_options().map_err(HubError::Validation)?;
    Hub::new(
        options,
        Arc::new(InMemorySubscriptionStore::new()),
        Arc::new(DefaultCryptoFunctions::new()),
    )
}

/// Log every failed subscriber delivery until the hub goes away.
pub fn spawn_failure_observer(hub: &Hub) -> JoinHandle<()> {
    let mut failures = hub.failures();
    tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(failure) => {
                    tracing::warn!(
                        target: "hubbub::failures",
                        topic = %failure.subscription.topic,
                        callback = %failure.subscription.callback,
                        message = %failure.message,
                        "subscriber notification failed"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "failure observer lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub struct HubServer {
    addr: SocketAddr,
    app: Router,
    hub: Arc<Hub>,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Must be called from within a Tokio runtime; the hub starts dispatching
    /// immediately.
    pub fn build(self) -> Result<HubServer, HubError> {
        let hub = build_hub(&self.config)?;
        let app = build_app(&self.config, AppState { hub: hub.clone() });

        Ok(HubServer {
            addr: self.addr,
            app,
            hub,
        })
    }
}

impl HubServer {
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let observer = spawn_failure_observer(&self.hub);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.hub.shutdown();
        observer.abort();
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
