use actix_web::{web, HttpResponse, Responder};
use log::{info, warn};
use uuid::Uuid;

use crate::recommend;
use crate::web::error::ApiError;
use crate::web::models::{HealthResponse, TitlesRequest, TitlesResponse};
use crate::AppState;

pub const SERVICE_NAME: &str = "anime-gpt-server";

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        ok: true,
        service: SERVICE_NAME.to_string(),
    })
}

// Recommendation endpoint: description and/or mood in, 2-3 exact titles out
pub async fn titles(
    data: web::Data<AppState>,
    req: web::Json<TitlesRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();
    let text = req.text.as_deref().unwrap_or_default().trim();
    let mood = req.mood.as_deref().unwrap_or_default().trim();
    let max_n = recommend::clamp_max(req.max.as_ref());

    if text.is_empty() && mood.is_empty() {
        return Err(ApiError::BadRequest("text or mood required".to_string()));
    }

    let request_id = Uuid::new_v4();
    info!(
        "Titles request {}: text={:?} mood={:?} max={}",
        request_id, text, mood, max_n
    );

    let titles = recommend::recommend(data.model.as_ref(), text, mood, max_n)
        .await
        .map_err(|e| {
            warn!("Titles request {} failed: {}", request_id, e);
            ApiError::from(e)
        })?;

    info!("Titles request {} -> {:?}", request_id, titles);
    Ok(HttpResponse::Ok().json(TitlesResponse { titles }))
}
