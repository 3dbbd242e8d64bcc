//! `VelocityServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderValue, Method};
use axum::response::Json;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use velocity_core::{AuditLog, SessionStore};

use crate::api;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::sweep::InactivitySweeper;
use crate::websocket::dispatch::SideEffects;
use crate::websocket::registry::Registry;

/// How long shutdown waits for in-flight store and audit writes.
const SIDE_EFFECT_DRAIN: Duration = Duration::from_secs(5);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions and their connections.
    pub registry: Arc<Registry>,
    /// Lifecycle store.
    pub store: Arc<dyn SessionStore>,
    /// Tuning for upgraded connections.
    pub pump: crate::config::PumpConfig,
    /// Deadline for store calls made on the request path.
    pub op_timeout: Duration,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct VelocityServer {
    config: ServerConfig,
    store: Arc<dyn SessionStore>,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl VelocityServer {
    /// Create a new server over the given collaborators.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditLog>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let effects = SideEffects::new(Arc::clone(&store), audit, config.side_effect_timeout);
        Self {
            config,
            store,
            registry: Arc::new(Registry::new(effects)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            pump: self.config.pump.clone(),
            op_timeout: self.config.side_effect_timeout,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(api::metrics))
            .route("/api/streams", post(api::create_stream))
            .route(
                "/api/streams/{streamId}",
                get(api::get_stream).delete(api::delete_stream),
            )
            .route("/api/feature-flags", get(api::feature_flags))
            .route("/ws/mobile/{streamId}", get(api::ws_mobile))
            .route("/ws/viewer/{streamId}", get(api::ws_viewer))
            .with_state(state)
            .layer(cors_layer(&self.config.cors_allowed_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// On shutdown every live connection is sent `stream_closed` and closed,
    /// then pending side effects get a bounded window to finish.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();
        let registry = Arc::clone(&self.registry);

        let handle = tokio::spawn(async move {
            let signal = {
                let registry = Arc::clone(&registry);
                async move {
                    token.cancelled().await;
                    let closed = registry.close_all();
                    info!(closed, "closing live connections");
                }
            };
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server error");
            }
            if !registry.effects().drain(SIDE_EFFECT_DRAIN).await {
                warn!(pending = registry.effects().pending(), "side effects still running");
            }
        });

        info!(addr = %local_addr, "velocity relay listening");
        Ok((local_addr, handle))
    }

    /// Start the inactivity sweep, unless it is disabled.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let sweep = self.config.sweep.clone()?;
        let sweeper = InactivitySweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            sweep,
            self.config.side_effect_timeout,
        );
        Some(sweeper.spawn(self.shutdown.token()))
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, ACCEPT, ORIGIN])
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.session_count(),
    );
    Json(resp)
}
