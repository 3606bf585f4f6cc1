use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod ai;
mod config;
mod controllers;
mod db;
mod dispatcher;
mod mcp;
mod mentions;
mod models;
mod sync;
mod tools;

use config::Config;
use db::Database;
use dispatcher::AgentDispatcher;
use mcp::BrowserSession;

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub dispatcher: Arc<AgentDispatcher>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).map_err(std::io::Error::other)?;
    let db = Arc::new(db);

    // One browser worker for the whole process, started on first use
    let browser = Arc::new(BrowserSession::new(
        &config.worker_commands.browser,
        config.worker_timeouts.browser,
    ));

    log::info!("Initializing agent dispatcher");
    let dispatcher = Arc::new(AgentDispatcher::new(db.clone(), config.clone(), browser.clone()));

    log::info!("Starting server on port {}", port);
    log::info!("MySQL worker: {}", config.worker_commands.mysql);
    log::info!("GitLab worker: {}", config.worker_commands.gitlab);
    log::info!("Browser worker: {}", config.worker_commands.browser);

    let state_config = config.clone();
    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                config: state_config.clone(),
                dispatcher: Arc::clone(&dispatcher),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::chat::config)
            .configure(controllers::conversations::config)
            .configure(controllers::settings::config)
            .configure(controllers::metadata::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await;

    log::info!("Server stopped, shutting down browser worker");
    browser.shutdown().await;
    result
}
