//! Classifies an inbound request by its endpoint path and extracts the
//! model field. This gateway is pure passthrough -- no cross-protocol
//! translation; the only rewrite is the `model` field via the route table.

use bytes::Bytes;
use llmgate_common::Provider;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundProtocol {
    AnthropicMessages,
    OpenAIChatCompletions,
    GeminiGenerateContent,
    GeminiStreamGenerateContent,
    QwenCompatibleChatCompletions,
}

impl InboundProtocol {
    pub fn provider(self) -> Provider {
        match self {
            InboundProtocol::AnthropicMessages => Provider::Anthropic,
            InboundProtocol::OpenAIChatCompletions => Provider::OpenAI,
            InboundProtocol::GeminiGenerateContent | InboundProtocol::GeminiStreamGenerateContent => Provider::Gemini,
            InboundProtocol::QwenCompatibleChatCompletions => Provider::Qwen,
        }
    }

    pub fn is_stream(self, body: &Value) -> bool {
        match self {
            InboundProtocol::GeminiStreamGenerateContent => true,
            InboundProtocol::GeminiGenerateContent => false,
            _ => body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// Classifies `path` against the gateway's four inbound routes. `gemini_model`
/// carries the `{model}` path segment when the match is a Gemini route,
/// since Gemini's model lives in the URL, not the body.
pub fn classify_path(path: &str) -> Option<(InboundProtocol, Option<String>)> {
    if path == "/v1/messages" {
        return Some((InboundProtocol::AnthropicMessages, None));
    }
    if path == "/v1/chat/completions" {
        return Some((InboundProtocol::OpenAIChatCompletions, None));
    }
    if path == "/compatible-mode/v1/chat/completions" {
        return Some((InboundProtocol::QwenCompatibleChatCompletions, None));
    }
    if let Some(rest) = path.strip_prefix("/v1beta/models/") {
        if let Some(model) = rest.strip_suffix(":generateContent") {
            return Some((InboundProtocol::GeminiGenerateContent, Some(model.to_string())));
        }
        if let Some(model) = rest.strip_suffix(":streamGenerateContent") {
            return Some((InboundProtocol::GeminiStreamGenerateContent, Some(model.to_string())));
        }
    }
    None
}

/// Extracts the model name the client asked for. For Gemini it comes from
/// the path segment; for every other protocol it's `body.model`.
pub fn extract_model(protocol: InboundProtocol, path_model: Option<&str>, body: &Value) -> Option<String> {
    match protocol {
        InboundProtocol::GeminiGenerateContent | InboundProtocol::GeminiStreamGenerateContent => {
            path_model.map(str::to_string)
        }
        _ => body.get("model").and_then(Value::as_str).map(str::to_string),
    }
}

/// Rewrites `body.model` in place for non-Gemini protocols, returning the
/// (possibly unchanged) bytes. Gemini's model lives in the URL and is
/// rewritten by the caller when building the outbound path instead.
pub fn rewrite_model(protocol: InboundProtocol, mut body: Value, target_model: &str) -> Bytes {
    if !matches!(protocol, InboundProtocol::GeminiGenerateContent | InboundProtocol::GeminiStreamGenerateContent)
        && let Value::Object(map) = &mut body
    {
        map.insert("model".to_string(), Value::String(target_model.to_string()));
    }
    Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_inbound_route() {
        assert_eq!(classify_path("/v1/messages").unwrap().0, InboundProtocol::AnthropicMessages);
        assert_eq!(classify_path("/v1/chat/completions").unwrap().0, InboundProtocol::OpenAIChatCompletions);
        assert_eq!(
            classify_path("/compatible-mode/v1/chat/completions").unwrap().0,
            InboundProtocol::QwenCompatibleChatCompletions
        );
        let (proto, model) = classify_path("/v1beta/models/gemini-1.5-pro:generateContent").unwrap();
        assert_eq!(proto, InboundProtocol::GeminiGenerateContent);
        assert_eq!(model.as_deref(), Some("gemini-1.5-pro"));
    }

    #[test]
    fn unknown_path_does_not_classify() {
        assert!(classify_path("/v1/unknown").is_none());
    }

    #[test]
    fn extracts_model_from_body_for_anthropic() {
        let body = serde_json::json!({"model": "claude-3-opus", "stream": true});
        let model = extract_model(InboundProtocol::AnthropicMessages, None, &body);
        assert_eq!(model.as_deref(), Some("claude-3-opus"));
        assert!(InboundProtocol::AnthropicMessages.is_stream(&body));
    }

    #[test]
    fn rewrite_model_replaces_body_field() {
        let body = serde_json::json!({"model": "claude-3-opus", "messages": []});
        let bytes = rewrite_model(InboundProtocol::AnthropicMessages, body, "claude-3-5-sonnet");
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["model"], "claude-3-5-sonnet");
    }
}
