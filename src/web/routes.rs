use actix_cors::Cors;
use actix_web::{error, web};
use crate::web::error::ApiError;
use crate::web::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        error::Error::from(ApiError::BadRequest(format!("invalid request body: {}", err)))
    }))
    .route("/", web::get().to(handlers::health_check))
    .route("/health", web::get().to(handlers::health_check))
    .route("/titles", web::post().to(handlers::titles));
}

// Browser and mobile clients call this directly, so any origin is accepted.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}
