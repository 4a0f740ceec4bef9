//! Prompt construction, lenient parsing of the model reply and the
//! two-attempt recommendation flow behind `POST /titles`.

use std::collections::HashSet;
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::model::{ChatCompletion, CompletionError};
use crate::web::models::Message;

pub const MIN_TITLES: usize = 2;
pub const MAX_TITLES: usize = 3;
pub const DEFAULT_MAX: usize = 3;

const RETRY_INSTRUCTION: &str = "Return strict JSON only as specified.";

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("model reply was not {{\"titles\": [...]}} after retry")]
    BadJson,

    #[error("model returned {0} usable titles")]
    TooFewTitles(usize),
}

/// Normalizes the client's `max` into the effective title count.
///
/// Integers are taken as is, fractional numbers truncate toward zero and
/// strings are parsed after trimming. Anything else uses `DEFAULT_MAX`.
pub fn clamp_max(raw: Option<&Value>) -> usize {
    let requested = match raw {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let requested = requested.unwrap_or(DEFAULT_MAX as i64);
    requested.clamp(MIN_TITLES as i64, MAX_TITLES as i64) as usize
}

pub fn system_prompt(max_n: usize) -> String {
    format!(
        "You are an anime recommender. Return ONLY strict JSON with exact anime titles.\n\
         Format: {{\"titles\":[\"Exact Title 1\",\"Exact Title 2\"]}}\n\
         Rules:\n\
         - Return between {MIN_TITLES} and {max_n} titles (inclusive).\n\
         - Prefer official English titles; if missing, use Romaji.\n\
         - Match the user's description and mood closely.\n\
         - No commentary. No extra keys. Strict JSON only."
    )
}

pub fn user_prompt(text: &str, mood: &str, max_n: usize) -> String {
    let mood = if mood.is_empty() { "(none)" } else { mood };
    format!("Description: {text}\nMood: {mood}\nNeed: {max_n} titles. Return JSON now.")
}

fn brace_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("static regex"))
}

/// Best-effort JSON recovery from model output.
///
/// Tries the whole string first, then the greedy span from the first `{` to
/// the last `}`. The span is not brace-balanced, so text holding several
/// objects will usually fail the second parse and yield `None`.
pub fn lenient_parse(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(raw) {
        return Some(value);
    }
    let span = brace_span().find(raw)?;
    serde_json::from_str(span.as_str()).ok()
}

/// The `titles` array of a parsed reply, if the reply has that shape.
pub fn titles_field(value: &Value) -> Option<&Vec<Value>> {
    value.get("titles").and_then(Value::as_array)
}

/// Trims, drops blanks and non-strings, and dedupes by exact match while
/// keeping the first occurrence.
pub fn clean_titles(raw: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}

/// Runs the prompt against `model`, retrying once with a stricter
/// instruction when the reply is not `{"titles": [...]}`.
///
/// Provider errors are returned immediately from either attempt.
pub async fn recommend(
    model: &dyn ChatCompletion,
    text: &str,
    mood: &str,
    max_n: usize,
) -> Result<Vec<String>, RecommendError> {
    let mut messages = vec![
        Message::system(system_prompt(max_n)),
        Message::user(user_prompt(text, mood, max_n)),
    ];
    debug!("Prompt: {:?}", messages);

    let raw = model.complete(&messages).await?;
    let mut parsed = lenient_parse(&raw).filter(|v| titles_field(v).is_some());

    if parsed.is_none() {
        warn!("Model reply was not strict JSON, retrying once");
        debug!("Rejected reply: {}", raw);
        messages.push(Message::user(RETRY_INSTRUCTION));
        let raw = model.complete(&messages).await?;
        parsed = lenient_parse(&raw).filter(|v| titles_field(v).is_some());
    }

    let parsed = parsed.ok_or(RecommendError::BadJson)?;
    let mut titles = titles_field(&parsed)
        .map(|raw| clean_titles(raw))
        .unwrap_or_default();

    if titles.len() < MIN_TITLES {
        return Err(RecommendError::TooFewTitles(titles.len()));
    }
    titles.truncate(max_n);
    Ok(titles)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every message list it receives.
    pub(crate) struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        pub calls: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedModel {
        async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("model called more times than scripted")
        }
    }

    fn ok(s: &str) -> Result<String, CompletionError> {
        Ok(s.to_string())
    }

    #[test]
    fn clamp_max_cases() {
        assert_eq!(clamp_max(Some(&json!(1))), 2);
        assert_eq!(clamp_max(Some(&json!(5))), 3);
        assert_eq!(clamp_max(Some(&json!(2))), 2);
        assert_eq!(clamp_max(Some(&json!("abc"))), DEFAULT_MAX);
        assert_eq!(clamp_max(Some(&json!(" 2 "))), 2);
        assert_eq!(clamp_max(Some(&json!(2.9))), 2);
        assert_eq!(clamp_max(Some(&json!(-7))), 2);
        assert_eq!(clamp_max(Some(&Value::Null)), DEFAULT_MAX);
        assert_eq!(clamp_max(Some(&json!(true))), DEFAULT_MAX);
        assert_eq!(clamp_max(None), DEFAULT_MAX);
    }

    #[test]
    fn prompts_carry_count_and_mood_placeholder() {
        let system = system_prompt(2);
        assert!(system.starts_with("You are an anime recommender."));
        assert!(system.contains("Format: {\"titles\":[\"Exact Title 1\",\"Exact Title 2\"]}"));
        assert!(system.contains("- Return between 2 and 2 titles (inclusive)."));
        assert!(system.ends_with("Strict JSON only."));

        assert_eq!(
            user_prompt("space bounty hunters", "", 3),
            "Description: space bounty hunters\nMood: (none)\nNeed: 3 titles. Return JSON now."
        );
        assert_eq!(
            user_prompt("", "melancholy", 2),
            "Description: \nMood: melancholy\nNeed: 2 titles. Return JSON now."
        );
    }

    #[test]
    fn lenient_parse_extracts_embedded_object() {
        let raw = "Sure! Here you go: {\"titles\":[\"Cowboy Bebop\",\"Steins;Gate\"]}";
        assert_eq!(
            lenient_parse(raw),
            Some(json!({"titles": ["Cowboy Bebop", "Steins;Gate"]}))
        );
    }

    #[test]
    fn lenient_parse_rejects_prose_and_empty() {
        assert_eq!(lenient_parse("not json at all"), None);
        assert_eq!(lenient_parse(""), None);
        assert_eq!(lenient_parse("{broken"), None);
    }

    #[test]
    fn lenient_parse_span_is_greedy() {
        let raw = "```json\n{\"titles\":[\"A\"]}\n``` or {\"titles\":[\"B\"]}";
        assert_eq!(lenient_parse(raw), None);

        let nested = "note: {\"titles\":[\"A\",\"B\"],\"meta\":{\"n\":2}} done";
        assert_eq!(
            lenient_parse(nested),
            Some(json!({"titles": ["A", "B"], "meta": {"n": 2}}))
        );
    }

    #[test]
    fn clean_titles_dedupes_in_order() {
        let raw = json!([" A", "B", "A ", "", "  ", 7, null, "C", "D", "a"]);
        assert_eq!(
            clean_titles(raw.as_array().unwrap()),
            vec!["A", "B", "C", "D", "a"]
        );
    }

    #[tokio::test]
    async fn duplicates_removed_then_truncated() {
        let model = ScriptedModel::new(vec![ok(r#"{"titles":["A","B","A","C","D"]}"#)]);
        let titles = recommend(&model, "anything", "", 3).await.unwrap();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn first_call_sends_system_and_user() {
        let model = ScriptedModel::new(vec![ok(r#"{"titles":["A","B"]}"#)]);
        recommend(&model, "mecha", "hype", 2).await.unwrap();

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][0], Message::system(system_prompt(2)));
        assert_eq!(calls[0][1], Message::user(user_prompt("mecha", "hype", 2)));
    }

    #[tokio::test]
    async fn malformed_reply_is_retried_once() {
        let model = ScriptedModel::new(vec![
            ok("I think you'd enjoy Cowboy Bebop!"),
            ok(r#"{"titles":["X","Y"]}"#),
        ]);
        let titles = recommend(&model, "jazz", "chill", 3).await.unwrap();
        assert_eq!(titles, vec!["X", "Y"]);
        assert_eq!(model.call_count(), 2);

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[1].len(), 3);
        assert_eq!(calls[1][..2], calls[0][..]);
        assert_eq!(calls[1][2], Message::user(RETRY_INSTRUCTION));
    }

    #[tokio::test]
    async fn missing_titles_key_is_retried() {
        let model = ScriptedModel::new(vec![
            ok(r#"{"anime":["A","B"]}"#),
            ok(r#"{"titles":"A, B"}"#),
        ]);
        let err = recommend(&model, "x", "", 3).await.unwrap_err();
        assert!(matches!(err, RecommendError::BadJson));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn too_few_titles_after_cleaning() {
        let model = ScriptedModel::new(vec![ok(r#"{"titles":["Akira"," Akira ",""]}"#)]);
        let err = recommend(&model, "x", "", 3).await.unwrap_err();
        assert!(matches!(err, RecommendError::TooFewTitles(1)));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn provider_error_is_not_retried() {
        let model = ScriptedModel::new(vec![
            Err(CompletionError::InvalidCredential("bad key".into())),
            ok(r#"{"titles":["X","Y"]}"#),
        ]);
        let err = recommend(&model, "x", "", 3).await.unwrap_err();
        assert!(matches!(
            err,
            RecommendError::Completion(CompletionError::InvalidCredential(_))
        ));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn provider_error_on_retry_surfaces() {
        let model = ScriptedModel::new(vec![
            ok("nope"),
            Err(CompletionError::InsufficientQuota("quota".into())),
        ]);
        let err = recommend(&model, "x", "", 3).await.unwrap_err();
        assert!(matches!(
            err,
            RecommendError::Completion(CompletionError::InsufficientQuota(_))
        ));
        assert_eq!(model.call_count(), 2);
    }
}
