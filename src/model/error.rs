use reqwest::StatusCode;
use thiserror::Error;

/// Failures raised by the completion provider. None of these are retried.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("OPENAI_API_KEY is not set")]
    MissingCredential,

    #[error("provider rejected the API key: {0}")]
    InvalidCredential(String),

    #[error("provider quota or billing limit reached: {0}")]
    InsufficientQuota(String),

    #[error("provider returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CompletionError {
    /// Maps a non-success provider response onto the error taxonomy.
    ///
    /// OpenAI reports errors as `{"error": {"message", "type", "code"}}`;
    /// a body that does not follow that shape is kept verbatim as the message.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));
        let field = |name: &str| {
            error
                .and_then(|e| e.get(name))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let message = match field("message") {
            m if m.is_empty() => body.trim().to_string(),
            m => m,
        };
        let code = field("code");
        let kind = field("type");

        let quota = |s: &str| s == "insufficient_quota" || s.starts_with("billing");
        if status == StatusCode::UNAUTHORIZED || code == "invalid_api_key" {
            CompletionError::InvalidCredential(message)
        } else if status == StatusCode::PAYMENT_REQUIRED || quota(&code) || quota(&kind) {
            CompletionError::InsufficientQuota(message)
        } else {
            CompletionError::Api { status, message }
        }
    }
}
