//! Provider tags and the ordered rules that map model identifiers onto them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub mod rules;

pub use rules::{ModelPattern, ModelType, ModelTypeRule, ProviderRule, ProviderRules};

/// Backend a session talks to. Resolved once per session and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderTag {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "mistral")]
    Mistral,
    /// Self-hosted LocalAI server.
    #[serde(rename = "localai")]
    LocalAi,
    /// Self-hosted Ollama server.
    #[serde(rename = "ollama")]
    Ollama,
    /// OpenRouter aggregator, addressed with `vendor/model` identifiers.
    #[serde(rename = "open_router")]
    OpenRouter,
    #[serde(rename = "xai")]
    Xai,
}

impl ProviderTag {
    /// Every known tag, in declaration order.
    pub const ALL: [ProviderTag; 8] = [
        ProviderTag::OpenAi,
        ProviderTag::Anthropic,
        ProviderTag::Google,
        ProviderTag::Mistral,
        ProviderTag::LocalAi,
        ProviderTag::Ollama,
        ProviderTag::OpenRouter,
        ProviderTag::Xai,
    ];

    /// Stable lowercase name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::OpenAi => "openai",
            ProviderTag::Anthropic => "anthropic",
            ProviderTag::Google => "google",
            ProviderTag::Mistral => "mistral",
            ProviderTag::LocalAi => "localai",
            ProviderTag::Ollama => "ollama",
            ProviderTag::OpenRouter => "open_router",
            ProviderTag::Xai => "xai",
        }
    }

    /// Self-hosted servers run without an API key.
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderTag::LocalAi | ProviderTag::Ollama)
    }

    /// Whether session construction must find an API key for this provider.
    pub fn requires_credential(&self) -> bool {
        !self.is_local()
    }

    /// Endpoint handed to the transport when neither the caller nor the
    /// provider options name one. Hosted vendors leave the choice to the transport.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderTag::Ollama => Some("http://localhost:11434"),
            ProviderTag::LocalAi => Some("http://localhost:8080"),
            ProviderTag::OpenRouter => Some("https://openrouter.ai/api"),
            ProviderTag::Xai => Some("https://api.x.ai/v1"),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = ClientError;

    /// Parses a provider name, accepting a few common spellings.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::provider::ProviderTag;
    ///
    /// assert_eq!("OpenRouter".parse::<ProviderTag>().unwrap(), ProviderTag::OpenRouter);
    /// assert!("bedrock".parse::<ProviderTag>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let tag = match normalized.as_str() {
            "openai" | "open_ai" => ProviderTag::OpenAi,
            "anthropic" => ProviderTag::Anthropic,
            "google" | "gemini" => ProviderTag::Google,
            "mistral" => ProviderTag::Mistral,
            "localai" | "local_ai" | "local" => ProviderTag::LocalAi,
            "ollama" => ProviderTag::Ollama,
            "open_router" | "openrouter" => ProviderTag::OpenRouter,
            "xai" | "x_ai" => ProviderTag::Xai,
            _ => {
                return Err(ClientError::UnsupportedProvider {
                    provider: s.to_string(),
                });
            }
        };
        Ok(tag)
    }
}
