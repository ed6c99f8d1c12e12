//! services/processor/src/adapters/chat.rs
//!
//! Shared plumbing for the analysis providers. All three vendors are reached
//! through OpenAI-compatible chat-completion endpoints, so the request building
//! and the mapping of `OpenAIError` onto the `ProviderError` taxonomy live here.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, FinishReason,
    },
    Client,
};
use session_insight_core::ports::ProviderError;

/// Instructions for providers that answer with a labelled progress note.
pub(crate) const NOTE_INSTRUCTIONS: &str = "You are an experienced clinical therapist writing a progress note for a therapy session transcript. \
Begin your answer with these labelled lines, each on its own line:\n\
Summary: <two or three sentences>\n\
Client mood: <a number from 1 to 10>\n\
Key topics: <comma-separated list>\n\
Techniques: <comma-separated list of therapeutic techniques used>\n\
Overall sentiment: <positive, neutral or negative>\n\
Emotional tone: <a few words>\n\
After these lines, write the full note in a SOAP layout.";

/// Instructions for providers that answer with a single JSON object.
pub(crate) const JSON_INSTRUCTIONS: &str = "You are an experienced clinical therapist analysing a therapy session transcript. \
Respond with a single JSON object and nothing else. Use exactly these keys: \
\"session_summary\" (string), \"client_mood\" (number from 1 to 10), \"key_topics\" (array of strings), \
\"therapeutic_techniques\" (array of strings), \"sentiment_analysis\" (object with \"overall_sentiment\" \
set to positive, neutral or negative, and \"emotional_tone\" as a short string).";

/// One chat request in vendor-neutral form.
pub(crate) struct ChatRequest<'a> {
    pub system: &'a str,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Builds the user turn, truncating the transcript to `max_chars`.
pub(crate) fn session_prompt(text: &str, owner_hint: &str, max_chars: usize) -> String {
    let transcript: String = text.chars().take(max_chars).collect();
    if owner_hint.trim().is_empty() {
        format!("SESSION TRANSCRIPT:\n\n{}", transcript)
    } else {
        format!("CLIENT: {}\n\nSESSION TRANSCRIPT:\n\n{}", owner_hint.trim(), transcript)
    }
}

/// Sends one chat completion and returns the text of the first choice.
pub(crate) async fn complete(
    client: &Client<OpenAIConfig>,
    model: &str,
    request: ChatRequest<'_>,
) -> Result<String, ProviderError> {
    let messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system)
                .build()
                .map_err(classify)?,
        ),
        ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user)
                .build()
                .map_err(classify)?,
        ),
    ];

    let chat_request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages(messages)
        .n(1)
        .max_tokens(request.max_tokens)
        .temperature(request.temperature)
        .build()
        .map_err(classify)?;

    let response = client.chat().create(chat_request).await.map_err(classify)?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::EmptyResponse("response contained no choices".to_string()))?;

    if matches!(choice.finish_reason, Some(FinishReason::ContentFilter)) {
        return Err(ProviderError::PolicyRejected(
            "response was withheld by the provider's content filter".to_string(),
        ));
    }

    match choice.message.content {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => Err(ProviderError::EmptyResponse(
            "response contained no text content".to_string(),
        )),
    }
}

/// Maps a client library error onto the provider taxonomy.
pub(crate) fn classify(err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                ProviderError::Timeout
            } else if let Some(status) = e.status() {
                classify_status(status.as_u16(), e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        }
        OpenAIError::ApiError(api) => classify_api_error(api.r#type.as_deref(), &api.message),
        OpenAIError::JSONDeserialize(..) => ProviderError::Server(
            "response body did not match the chat completion schema".to_string(),
        ),
        OpenAIError::InvalidArgument(message) => ProviderError::InvalidRequest(message),
        other => ProviderError::Server(other.to_string()),
    }
}

/// Classifies by HTTP status when the transport exposes one.
pub(crate) fn classify_status(status: u16, detail: String) -> ProviderError {
    match status {
        408 => ProviderError::Timeout,
        429 => ProviderError::RateLimited(detail),
        401 | 403 => ProviderError::Auth(detail),
        400 | 404 | 413 | 422 => ProviderError::InvalidRequest(detail),
        500..=599 => ProviderError::Server(detail),
        _ => ProviderError::Network(detail),
    }
}

/// Classifies a structured API error body by its type and message.
pub(crate) fn classify_api_error(kind: Option<&str>, message: &str) -> ProviderError {
    let kind = kind.unwrap_or_default().to_ascii_lowercase();
    let lower = message.to_lowercase();
    let detail = message.to_string();

    if lower.contains("policy") || lower.contains("safety") || kind.contains("content_filter") {
        ProviderError::PolicyRejected(detail)
    } else if kind.contains("rate_limit") || lower.contains("rate limit") {
        ProviderError::RateLimited(detail)
    } else if kind.contains("auth")
        || kind.contains("permission")
        || kind == "insufficient_quota"
        || lower.contains("api key")
    {
        ProviderError::Auth(detail)
    } else if kind.contains("server") || kind.contains("overloaded") || kind == "api_error" {
        ProviderError::Server(detail)
    } else if kind.contains("invalid_request") || kind.contains("not_found") {
        ProviderError::InvalidRequest(detail)
    } else {
        ProviderError::Server(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_transient_or_permanent() {
        assert_eq!(classify_status(429, "slow down".into()), ProviderError::RateLimited("slow down".into()));
        assert!(classify_status(503, "down".into()).is_transient());
        assert!(classify_status(401, "no".into()).is_permanent());
        assert!(classify_status(400, "bad".into()).is_permanent());
        assert_eq!(classify_status(408, String::new()), ProviderError::Timeout);
    }

    #[test]
    fn api_error_types_are_classified() {
        assert!(matches!(
            classify_api_error(Some("invalid_request_error"), "Incorrect API key provided"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_api_error(Some("rate_limit_error"), "Too many requests"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_api_error(Some("invalid_request_error"), "Your request was rejected by our usage policy"),
            ProviderError::PolicyRejected(_)
        ));
        assert!(matches!(
            classify_api_error(Some("overloaded_error"), "Overloaded"),
            ProviderError::Server(_)
        ));
        assert!(matches!(
            classify_api_error(Some("invalid_request_error"), "max_tokens is too large"),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(classify_api_error(None, "something odd"), ProviderError::Server(_)));
    }

    #[test]
    fn prompt_includes_owner_and_truncates() {
        let prompt = session_prompt("abcdef", " Jordan ", 3);
        assert_eq!(prompt, "CLIENT: Jordan\n\nSESSION TRANSCRIPT:\n\nabc");
        assert_eq!(session_prompt("hello", "", 100), "SESSION TRANSCRIPT:\n\nhello");
    }
}
