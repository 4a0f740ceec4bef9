use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use thiserror::Error;

use crate::model::CompletionError;
use crate::recommend::RecommendError;
use crate::web::models::ErrorResponse;

const MAX_DETAIL_CHARS: usize = 200;

/// Client-facing failures of the HTTP layer. The `Display` text is the
/// `detail` string sent back to the caller.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("server_misconfigured: OPENAI_API_KEY is not set")]
    Misconfigured,

    #[error("invalid_api_key")]
    InvalidApiKey,

    #[error("insufficient_quota")]
    InsufficientQuota,

    #[error("openai_error: {0}")]
    Upstream(String),

    #[error("bad_ai_json")]
    BadAiJson,

    #[error("need_at_least_two_titles")]
    TooFewTitles,
}

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        error!("Completion failed: {:?}", err);
        match err {
            CompletionError::MissingCredential => ApiError::Misconfigured,
            CompletionError::InvalidCredential(_) => ApiError::InvalidApiKey,
            CompletionError::InsufficientQuota(_) => ApiError::InsufficientQuota,
            CompletionError::Api { message, .. } => ApiError::Upstream(shorten(&message)),
            CompletionError::Transport(e) if e.is_timeout() => {
                ApiError::Upstream("request timed out".to_string())
            }
            CompletionError::Transport(e) if e.is_connect() => {
                ApiError::Upstream("could not connect to provider".to_string())
            }
            CompletionError::Transport(_) => ApiError::Upstream("request failed".to_string()),
        }
    }
}

impl From<RecommendError> for ApiError {
    fn from(err: RecommendError) -> Self {
        match err {
            RecommendError::Completion(e) => e.into(),
            RecommendError::BadJson => ApiError::BadAiJson,
            RecommendError::TooFewTitles(_) => ApiError::TooFewTitles,
        }
    }
}

fn shorten(message: &str) -> String {
    let message = message.trim();
    match message.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

// Allow Actix to convert our custom error into an HTTP response
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ApiError::InsufficientQuota
            | ApiError::Upstream(_)
            | ApiError::BadAiJson
            | ApiError::TooFewTitles => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.to_string(),
        })
    }
}
