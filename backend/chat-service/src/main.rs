use actix_web::{middleware::Logger, web, App, HttpServer};
use chat_service::{
    config::Config,
    db,
    error::AppError,
    logging,
    queue::{LoggingHandler, QueueBridge},
    repository::{PgIdentityDirectory, PgMessageRepository},
    routes,
    state::AppState,
};
use crypto_core::JwtValidator;
use std::sync::Arc;

fn cors(frontend_url: Option<&str>) -> actix_cors::Cors {
    let cors = match frontend_url {
        Some(origin) => actix_cors::Cors::default().allowed_origin(origin),
        None => actix_cors::Cors::default().allow_any_origin(),
    };
    cors.allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    let cfg = Arc::new(Config::from_env()?);
    logging::init_tracing(cfg.log_format);

    let jwt = JwtValidator::from_rsa_pem(&cfg.jwt_public_key_pem)
        .map_err(|e| AppError::Config(format!("JWT public key: {e}")))?;

    let pool = db::init_pool(&cfg)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;

    let queue = Arc::new(QueueBridge::from_config(&cfg.queue));
    if !queue.connect().await {
        tracing::warn!(
            queue = %queue.queue_name(),
            "queue unavailable at startup, running degraded"
        );
    }
    let consumer = match queue.consume(Arc::new(LoggingHandler)).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "queue consumer could not start");
            None
        }
    };

    let state = AppState::new(
        cfg.clone(),
        Arc::new(PgMessageRepository::new(pool.clone())),
        Arc::new(PgIdentityDirectory::new(pool.clone())),
        queue.clone(),
        jwt,
    );

    tracing::info!(port = cfg.port, "starting chat-service");

    let frontend_url = cfg.frontend_url.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(cors(frontend_url.as_deref()))
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", cfg.port))
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("server: {e}")))?;

    tracing::info!("shutting down");
    queue.close().await;
    if let Some(consumer) = consumer {
        consumer.abort();
    }
    pool.close().await;

    Ok(())
}
