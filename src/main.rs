use log::{error, info};
use migration::{Migrator, MigratorTrait};
use realtime::domain_event_handler::RealtimeEventHandler;
use service::{config::Config, logging::Logger};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!(
        "Starting ResQ dispatch platform in {} mode",
        config.runtime_env
    );

    let db = match service::init_database(&config).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = Migrator::up(db.as_ref(), None).await {
        error!("Failed to run database migrations: {e}");
        std::process::exit(1);
    }

    // The realtime registry and the dispatch engine are constructed once
    // here and injected; nothing below this point reaches for globals.
    let realtime_manager = Arc::new(realtime::Manager::new());

    let event_publisher = events::EventPublisher::new().with_handler(Arc::new(
        RealtimeEventHandler::new(realtime_manager.clone()),
    ));

    let dispatcher = Arc::new(domain::emergency::Dispatcher::new(
        db.clone(),
        config.clone(),
        event_publisher,
    ));

    let app_state = web::AppState::new(config, &db, realtime_manager, dispatcher.clone());

    if let Err(e) = web::init_server(app_state).await {
        error!("Server error: {e}");
    }

    dispatcher.shutdown();
}
