use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ClientError;

use super::ProviderTag;

/// Case-insensitive regular expression matched against a model identifier.
///
/// Serializes as its source text so rule lists can live in configuration files.
#[derive(Clone)]
pub struct ModelPattern(Regex);

impl ModelPattern {
    /// Compiles `pattern` case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] when the expression does not compile.
    pub fn new(pattern: &str) -> Result<Self, ClientError> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(Self)
            .map_err(|err| ClientError::InvalidConfig {
                field: "provider_rules".to_string(),
                reason: format!("invalid pattern {pattern:?}: {err}"),
            })
    }

    pub fn is_match(&self, model: &str) -> bool {
        self.0.is_match(model)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ModelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelPattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for ModelPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for ModelPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModelPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        ModelPattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// One `(provider, predicate)` pair of the resolution table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRule {
    pub provider: ProviderTag,
    pub pattern: ModelPattern,
}

/// Ordered provider resolution table. The first matching rule wins, so order is
/// preserved exactly as configured and never re-sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderRules {
    rules: Vec<ProviderRule>,
}

const BUILTIN_RULES: [(ProviderTag, &str); 8] = [
    (ProviderTag::Anthropic, "^claude"),
    (
        ProviderTag::OpenAi,
        "^(gpt|davinci|curie|babbage|ada|whisper|tts|dall-e|o1|o3)",
    ),
    (ProviderTag::Google, "^(gemini|palm)"),
    (ProviderTag::Mistral, "^(mistral|codestral)"),
    (ProviderTag::LocalAi, "^local-"),
    (ProviderTag::Ollama, "(llama-|nomic)"),
    (ProviderTag::Xai, "^grok"),
    (ProviderTag::OpenRouter, "^[^/]+/[^/]+$"),
];

const BUILTIN_MODEL_TYPES: [(ModelType, &str); 4] = [
    (
        ModelType::TextToText,
        concat!(
            "^(nomic|gpt|davinci|curie|babbage|ada|claude|gemini|palm|",
            "command|generate|j2-|mistral|codestral)"
        ),
    ),
    (ModelType::SpeechToText, "^whisper"),
    (ModelType::TextToSpeech, "^tts"),
    (ModelType::TextToImage, "^dall-e"),
];

/// Compiles one of the literal tables above. Every entry is checked by
/// `builtin_patterns_compile`, so a failure here is a typo in this file.
fn builtin_pattern(pattern: &'static str) -> ModelPattern {
    match ModelPattern::new(pattern) {
        Ok(pattern) => pattern,
        Err(err) => panic!("builtin pattern {pattern:?} is invalid: {err}"),
    }
}

impl ProviderRules {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The default table shipped with the crate.
    pub fn builtin() -> Self {
        static BUILTIN: LazyLock<Vec<ProviderRule>> = LazyLock::new(|| {
            BUILTIN_RULES
                .iter()
                .map(|(provider, pattern)| ProviderRule {
                    provider: *provider,
                    pattern: builtin_pattern(pattern),
                })
                .collect()
        });
        Self {
            rules: BUILTIN.clone(),
        }
    }

    /// Appends a rule; it is consulted after every rule already present.
    pub fn push(&mut self, provider: ProviderTag, pattern: &str) -> Result<(), ClientError> {
        let pattern = ModelPattern::new(pattern)?;
        self.rules.push(ProviderRule { provider, pattern });
        Ok(())
    }

    /// Drops every rule that targets `provider`.
    pub fn remove(&mut self, provider: ProviderTag) {
        self.rules.retain(|rule| rule.provider != provider);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule targets `provider`.
    pub fn contains(&self, provider: ProviderTag) -> bool {
        self.rules.iter().any(|rule| rule.provider == provider)
    }

    /// Configured providers in rule order, without duplicates.
    pub fn providers(&self) -> Vec<ProviderTag> {
        let mut seen = Vec::new();
        for rule in &self.rules {
            if !seen.contains(&rule.provider) {
                seen.push(rule.provider);
            }
        }
        seen
    }

    /// Maps a model identifier to its provider.
    ///
    /// An explicit override short-circuits pattern matching but must name a
    /// provider that has at least one configured rule.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::provider::{ProviderRules, ProviderTag};
    ///
    /// let rules = ProviderRules::builtin();
    /// assert_eq!(rules.resolve("claude-3", None).unwrap(), ProviderTag::Anthropic);
    /// assert_eq!(rules.resolve("gpt-4", Some(ProviderTag::Ollama)).unwrap(), ProviderTag::Ollama);
    /// assert!(rules.resolve("foo-bar", None).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// [`ClientError::UnsupportedProvider`] for an unconfigured override,
    /// [`ClientError::UnsupportedModel`] when no rule matches.
    pub fn resolve(
        &self,
        model: &str,
        explicit: Option<ProviderTag>,
    ) -> Result<ProviderTag, ClientError> {
        if let Some(provider) = explicit {
            if !self.contains(provider) {
                return Err(ClientError::UnsupportedProvider {
                    provider: provider.to_string(),
                });
            }
            return Ok(provider);
        }

        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(model))
            .map(|rule| rule.provider)
            .ok_or_else(|| ClientError::UnsupportedModel {
                model: model.to_string(),
            })
    }

    /// Same as [`ProviderRules::resolve`] with the override given by name.
    pub fn resolve_named(
        &self,
        model: &str,
        explicit: Option<&str>,
    ) -> Result<ProviderTag, ClientError> {
        let explicit = explicit.map(str::parse::<ProviderTag>).transpose()?;
        self.resolve(model, explicit)
    }
}

impl Default for ProviderRules {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Broad capability class of a model, used for informational queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    TextToText,
    SpeechToText,
    TextToSpeech,
    TextToImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTypeRule {
    pub model_type: ModelType,
    pub pattern: ModelPattern,
}

impl ModelTypeRule {
    pub fn builtin() -> Vec<ModelTypeRule> {
        static BUILTIN: LazyLock<Vec<ModelTypeRule>> = LazyLock::new(|| {
            BUILTIN_MODEL_TYPES
                .iter()
                .map(|(model_type, pattern)| ModelTypeRule {
                    model_type: *model_type,
                    pattern: builtin_pattern(pattern),
                })
                .collect()
        });
        BUILTIN.clone()
    }

    /// First matching model type, if any.
    pub fn classify(rules: &[ModelTypeRule], model: &str) -> Option<ModelType> {
        rules
            .iter()
            .find(|rule| rule.pattern.is_match(model))
            .map(|rule| rule.model_type)
    }
}
