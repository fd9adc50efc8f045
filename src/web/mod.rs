//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::Config;
use crate::db::Store;
use crate::live::LiveChannel;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub live: Arc<LiveChannel>,
}

/// Web server for Watchpost.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: Config,
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        live: Arc<LiveChannel>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                live,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Target CRUD
            .route(
                "/api/targets",
                get(handlers::handle_get_targets).post(handlers::handle_create_target),
            )
            .route(
                "/api/targets/{id}",
                get(handlers::handle_get_target)
                    .put(handlers::handle_update_target)
                    .delete(handlers::handle_delete_target),
            )
            // Monitoring operations
            .route("/api/targets/{id}/check", post(handlers::handle_check_target))
            .route("/api/targets/{id}/ports", post(handlers::handle_scan_ports))
            .route(
                "/api/targets/{id}/notifications",
                put(handlers::handle_update_notifications),
            )
            .route("/api/history", get(handlers::handle_get_history))
            // Live updates
            .route("/ws", get(handlers::handle_ws))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
