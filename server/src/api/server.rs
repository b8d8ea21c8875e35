//! API server initialization

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::routes::health::{self, HealthState};
use super::routes::{otlp, spans};
use crate::app::CoreApp;
use crate::core::constants::OTLP_BODY_LIMIT;

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until shutdown is triggered; returns the app for teardown.
    pub async fn start(self) -> Result<CoreApp> {
        let app = self.app;
        let shutdown = app.shutdown.clone();

        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);

        let health_routes = Router::new()
            .route("/api/v1/health", get(health::health))
            .with_state(HealthState {
                tracing_queue: app.tracing_queue.clone(),
                observability_queue: app.observability_queue.clone(),
            });

        let otlp_routes =
            otlp::routes(app.ingest.clone()).layer(DefaultBodyLimit::max(OTLP_BODY_LIMIT));

        let router = Router::new()
            .nest("/otlp/{project_id}/v1", otlp_routes)
            .nest(
                "/api/v1/project/{project_id}/spans",
                spans::routes(app.query.clone()),
            )
            .merge(health_routes)
            .layer(TraceLayer::new_for_http())
            .layer(cors());

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "API server listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}

/// Permissive CORS: there is no browser-credential surface here (no
/// authn by design), so origins are not restricted.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}
