mod config;
mod model;
mod recommend;
mod web;

use std::sync::Arc;

use actix_web::{middleware::Logger, web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{info, warn};

use config::Config;
use model::{ChatCompletion, OpenAiModel};
use web::routes;

// App state structure
struct AppState {
    model: Arc<dyn ChatCompletion>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting anime-gpt-server");

    let config = Config::from_env();
    if config.openai.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; /titles will answer with a configuration error");
    }

    let model = OpenAiModel::new(config.openai.clone())?;
    let app_state = Data::new(AppState {
        model: Arc::new(model),
    });

    info!("Listening on {}:{}", config.host, config.port);

    // Start web server
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(routes::cors())
            .app_data(app_state.clone())
            .configure(routes::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
