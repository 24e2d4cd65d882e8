//! HTTP/WebSocket surface of the dispatch core: the `/ws` realtime channel,
//! a liveness probe, and the handshake authentication that binds each
//! socket to a user identity.

use domain::emergency::Dispatcher;
use log::*;
use sea_orm::DatabaseConnection;
use service::config::Config;
use std::sync::Arc;

mod controller;
mod extractors;
pub mod router;
mod ws;

/// Web-layer state shared by every handler. Cloneable so axum can hand it
/// to each connection; the interesting members are behind Arcs.
#[derive(Clone)]
pub struct AppState {
    pub database_connection: Arc<DatabaseConnection>,
    pub config: Config,
    pub realtime_manager: Arc<realtime::Manager>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: &Arc<DatabaseConnection>,
        realtime_manager: Arc<realtime::Manager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            database_connection: Arc::clone(db),
            config,
            realtime_manager,
            dispatcher,
        }
    }

    pub fn db_conn_ref(&self) -> &DatabaseConnection {
        self.database_connection.as_ref()
    }
}

/// Bind the configured interface/port and serve until the process is asked
/// to stop.
pub async fn init_server(app_state: AppState) -> Result<(), std::io::Error> {
    let host = app_state
        .config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = app_state.config.port;

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!("Server starting... listening for connections on http://{host}:{port}");

    let router = router::define_routes(app_state);

    axum::serve(listener, router).await
}
