use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, http::header, web};
use cropdoc::config::AppConfig;
use cropdoc::pipeline::InferencePipeline;
use cropdoc::routes::{IMAGE_ID_HEADER, configure_routes};
use cropdoc::state::AppState;
use cropdoc::storage::prediction_log::PredictionLog;
use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let pipeline = InferencePipeline::from_config(&config).map_err(|e| {
        log::error!("Failed to load recommendations: {}", e);
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    })?;
    if pipeline.is_ready() {
        log::info!(
            "Model ready with {} classes ({})",
            pipeline.num_classes().unwrap_or_default(),
            config.model.weights_path.display()
        );
    }

    let prediction_log = match &config.storage.prediction_log_dir {
        Some(dir) => match PredictionLog::open(dir) {
            Ok(log) => {
                log::info!("Journaling predictions to {}", log.dir().display());
                Some(log)
            }
            Err(e) => {
                log::error!("Failed to open prediction log at {}: {}", dir.display(), e);
                return Err(io::Error::other(e.to_string()));
            }
        },
        None => None,
    };

    let state = web::Data::new(AppState::new(pipeline, prediction_log));
    let static_dir = config.server.static_dir.clone();
    let bind_address = (config.server.host.clone(), config.server.port);

    log::info!("Starting server on {}:{}", bind_address.0, bind_address.1);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                    .expose_headers(vec![IMAGE_ID_HEADER])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(|cfg| configure_routes(cfg, static_dir.clone()))
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(bind_address)?.run().await
}
