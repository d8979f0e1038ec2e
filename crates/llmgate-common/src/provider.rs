use serde::{Deserialize, Serialize};

/// The external LLM service an [`UpstreamAccount`] credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    OpenAI,
    Gemini,
    Qwen,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
            Provider::Qwen => "qwen",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "anthropic" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAI),
            "gemini" => Some(Provider::Gemini),
            "qwen" => Some(Provider::Qwen),
            _ => None,
        }
    }

    /// Provider inferred from the inbound endpoint path.
    pub fn from_inbound_path(path: &str) -> Option<Self> {
        let path = path.trim_start_matches('/');
        if path.starts_with("v1/messages") {
            Some(Provider::Anthropic)
        } else if path.starts_with("v1/chat/completions") {
            Some(Provider::OpenAI)
        } else if path.starts_with("v1beta/models/") {
            Some(Provider::Gemini)
        } else if path.starts_with("compatible-mode/v1/chat/completions") {
            Some(Provider::Qwen)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_provider_from_path() {
        assert_eq!(
            Provider::from_inbound_path("/v1/messages"),
            Some(Provider::Anthropic)
        );
        assert_eq!(
            Provider::from_inbound_path("/v1/chat/completions"),
            Some(Provider::OpenAI)
        );
        assert_eq!(
            Provider::from_inbound_path("/v1beta/models/gemini-2.5-pro:generateContent"),
            Some(Provider::Gemini)
        );
        assert_eq!(
            Provider::from_inbound_path("/compatible-mode/v1/chat/completions"),
            Some(Provider::Qwen)
        );
        assert_eq!(Provider::from_inbound_path("/unknown"), None);
    }
}
