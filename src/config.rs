//! Session configuration and its layering.
//!
//! A session's [`Config`] is assembled once, at construction, from four
//! layers applied in order:
//!
//! 1. built-in defaults ([`Config::default`]);
//! 2. process-wide defaults changed through [`configure`];
//! 3. a JSON overlay file named by the `LLM_RELAY_CONFIG` environment variable;
//! 4. per-session overrides from the session builder.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{OnceLock, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ClientError;
use crate::provider::{ModelType, ModelTypeRule, ProviderRules, ProviderTag};

/// Environment variable holding the path of a JSON overlay file.
pub const CONFIG_PATH_ENV: &str = "LLM_RELAY_CONFIG";

/// Effective settings of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Passed through to the transport, which enforces it.
    #[serde(with = "opt_duration_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Return provider envelopes from `chat` instead of extracted text.
    pub return_raw: bool,
    /// Prior exchanges kept per session; `0` disables context.
    pub context_length: usize,
    /// Pause before each chunk of a batch embedding.
    #[serde(with = "duration_secs")]
    pub batch_delay: Duration,
    /// Per-provider transport options, e.g. `base_url`.
    pub providers: BTreeMap<ProviderTag, Map<String, Value>>,
    pub provider_rules: ProviderRules,
    pub model_types: Vec<ModelTypeRule>,
    /// Candidate API-key variables per provider, first non-empty wins.
    pub api_key_env_vars: BTreeMap<ProviderTag, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let api_key_env_vars: BTreeMap<ProviderTag, Vec<String>> = [
            (ProviderTag::OpenAi, &["OPENAI_API_KEY", "OPENAI_ACCESS_TOKEN"][..]),
            (ProviderTag::Anthropic, &["ANTHROPIC_API_KEY"][..]),
            (ProviderTag::Google, &["GOOGLE_API_KEY", "GEMINI_API_KEY"][..]),
            (ProviderTag::Mistral, &["MISTRAL_API_KEY"][..]),
            (
                ProviderTag::OpenRouter,
                &["OPEN_ROUTER_API_KEY", "OPENROUTER_API_KEY"][..],
            ),
            (ProviderTag::Xai, &["XAI_API_KEY"][..]),
        ]
        .into_iter()
        .map(|(provider, vars)| (provider, vars.iter().map(|v| v.to_string()).collect()))
        .collect();

        Self {
            timeout: None,
            return_raw: false,
            context_length: 5,
            batch_delay: Duration::from_secs(1),
            providers: BTreeMap::new(),
            provider_rules: ProviderRules::builtin(),
            model_types: ModelTypeRule::builtin(),
            api_key_env_vars,
        }
    }
}

impl Config {
    /// Applies `overlay` on top of `self`.
    ///
    /// Scalars and rule lists are replaced when present. Provider options are
    /// merged key by key, and credential variable lists are replaced per
    /// provider.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::config::{Config, ConfigOverlay};
    ///
    /// let overlay =
    ///     ConfigOverlay::from_json(r#"{"context_length": 2, "return_raw": true}"#).unwrap();
    /// let config = Config::default().merge(overlay);
    /// assert_eq!(config.context_length, 2);
    /// assert!(config.return_raw);
    /// ```
    pub fn merge(mut self, overlay: ConfigOverlay) -> Self {
        if let Some(timeout) = overlay.timeout {
            self.timeout = Some(timeout);
        }
        if let Some(return_raw) = overlay.return_raw {
            self.return_raw = return_raw;
        }
        if let Some(context_length) = overlay.context_length {
            self.context_length = context_length;
        }
        if let Some(batch_delay) = overlay.batch_delay {
            self.batch_delay = batch_delay;
        }
        for (provider, options) in overlay.providers.unwrap_or_default() {
            self.providers.entry(provider).or_default().extend(options);
        }
        if let Some(rules) = overlay.provider_rules {
            self.provider_rules = rules;
        }
        if let Some(model_types) = overlay.model_types {
            self.model_types = model_types;
        }
        for (provider, vars) in overlay.api_key_env_vars.unwrap_or_default() {
            self.api_key_env_vars.insert(provider, vars);
        }
        self
    }

    /// Process-wide defaults plus the `LLM_RELAY_CONFIG` overlay, if any.
    pub fn load() -> Result<Self, ClientError> {
        let config = global_config();
        Ok(match ConfigOverlay::from_env()? {
            Some(overlay) => config.merge(overlay),
            None => config,
        })
    }

    /// Candidate API-key variables for `provider`, in lookup order.
    pub fn env_vars_for(&self, provider: ProviderTag) -> &[String] {
        self.api_key_env_vars
            .get(&provider)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The value of the first candidate variable that is set and non-empty.
    pub fn api_key_for(&self, provider: ProviderTag) -> Option<String> {
        self.env_vars_for(provider)
            .iter()
            .filter_map(|name| env::var(name).ok())
            .find(|value| !value.trim().is_empty())
    }

    pub fn provider_options(&self, provider: ProviderTag) -> Map<String, Value> {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }

    /// Configured `base_url` option, falling back to the provider default.
    pub fn base_url_for(&self, provider: ProviderTag) -> Option<String> {
        self.providers
            .get(&provider)
            .and_then(|options| options.get("base_url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| provider.default_base_url().map(str::to_string))
    }

    pub fn model_type(&self, model: &str) -> Option<ModelType> {
        ModelTypeRule::classify(&self.model_types, model)
    }
}

/// Partial [`Config`]; every absent field leaves the base value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverlay {
    #[serde(with = "opt_duration_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub return_raw: Option<bool>,
    pub context_length: Option<usize>,
    #[serde(with = "opt_duration_secs", skip_serializing_if = "Option::is_none")]
    pub batch_delay: Option<Duration>,
    pub providers: Option<BTreeMap<ProviderTag, Map<String, Value>>>,
    pub provider_rules: Option<ProviderRules>,
    pub model_types: Option<Vec<ModelTypeRule>>,
    pub api_key_env_vars: Option<BTreeMap<ProviderTag, Vec<String>>>,
}

impl ConfigOverlay {
    pub fn from_json(source: &str) -> Result<Self, ClientError> {
        serde_json::from_str(source).map_err(|err| ClientError::InvalidConfig {
            field: CONFIG_PATH_ENV.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|err| ClientError::InvalidConfig {
            field: CONFIG_PATH_ENV.to_string(),
            reason: format!("cannot read {}: {err}", path.display()),
        })?;
        debug!(path = %path.display(), "loaded config overlay");
        Self::from_json(&source)
    }

    /// Reads the overlay named by `LLM_RELAY_CONFIG`; `None` when unset or empty.
    pub fn from_env() -> Result<Option<Self>, ClientError> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(path.trim()).map(Some),
            _ => Ok(None),
        }
    }
}

fn global_slot() -> &'static RwLock<Config> {
    static GLOBAL: OnceLock<RwLock<Config>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Config::default()))
}

/// Mutates the process-wide defaults. Sessions built afterwards see the change;
/// existing sessions keep their snapshot.
///
/// # Examples
///
/// ```
/// use llm_relay::config::{configure, global_config};
///
/// configure(|config| config.context_length = 8);
/// assert_eq!(global_config().context_length, 8);
/// ```
pub fn configure<F>(update: F)
where
    F: FnOnce(&mut Config),
{
    let mut config = global_slot()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    update(&mut config);
    debug!("updated global config");
}

/// Snapshot of the process-wide defaults.
pub fn global_config() -> Config {
    global_slot()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.context_length, 5);
        assert!(!config.return_raw);
        assert_eq!(config.batch_delay, Duration::from_secs(1));
        assert_eq!(config.timeout, None);
        assert_eq!(
            config.env_vars_for(ProviderTag::OpenAi),
            ["OPENAI_API_KEY", "OPENAI_ACCESS_TOKEN"]
        );
        assert!(config.env_vars_for(ProviderTag::Ollama).is_empty());
    }

    #[test]
    fn overlay_merges_provider_options_per_key() {
        let mut base = Config::default();
        base.providers.insert(
            ProviderTag::Ollama,
            json!({"base_url": "http://gpu-box:11434", "keep_alive": "5m"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );

        let overlay = ConfigOverlay::from_json(
            r#"{"timeout": 30, "providers": {"ollama": {"keep_alive": "1h"}}}"#,
        )
        .expect("overlay");
        let merged = base.merge(overlay);

        assert_eq!(merged.timeout, Some(Duration::from_secs(30)));
        let options = merged.provider_options(ProviderTag::Ollama);
        assert_eq!(options.get("keep_alive"), Some(&json!("1h")));
        assert_eq!(
            merged.base_url_for(ProviderTag::Ollama).as_deref(),
            Some("http://gpu-box:11434")
        );
    }

    #[test]
    fn overlay_rejects_unknown_fields_and_bad_durations() {
        assert!(matches!(
            ConfigOverlay::from_json(r#"{"context_len": 3}"#),
            Err(ClientError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ConfigOverlay::from_json(r#"{"batch_delay": -1}"#),
            Err(ClientError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn overlay_replaces_rule_order() {
        let overlay = ConfigOverlay::from_json(
            r#"{"provider_rules": [{"provider": "ollama", "pattern": "^gpt"}]}"#,
        )
        .expect("overlay");
        let config = Config::default().merge(overlay);
        assert_eq!(
            config.provider_rules.resolve("gpt-4", None).expect("resolves"),
            ProviderTag::Ollama
        );
        assert!(config.provider_rules.resolve("claude-3", None).is_err());
    }

    #[test]
    fn base_url_falls_back_to_provider_default() {
        let config = Config::default();
        assert_eq!(
            config.base_url_for(ProviderTag::LocalAi).as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(config.base_url_for(ProviderTag::OpenAi), None);
    }

    #[test]
    fn first_non_empty_env_var_wins() {
        let config = Config::default();
        temp_env::with_vars(
            [
                ("GOOGLE_API_KEY", Some("")),
                ("GEMINI_API_KEY", Some("gemini-key")),
            ],
            || {
                assert_eq!(
                    config.api_key_for(ProviderTag::Google).as_deref(),
                    Some("gemini-key")
                );
            },
        );
        temp_env::with_vars(
            [
                ("OPENAI_API_KEY", Some("primary")),
                ("OPENAI_ACCESS_TOKEN", Some("secondary")),
            ],
            || {
                assert_eq!(
                    config.api_key_for(ProviderTag::OpenAi).as_deref(),
                    Some("primary")
                );
            },
        );
        temp_env::with_vars_unset(["MISTRAL_API_KEY"], || {
            assert_eq!(config.api_key_for(ProviderTag::Mistral), None);
        });
    }

    #[test]
    fn env_overlay_path_is_read() {
        let dir = env::temp_dir().join(format!("llm-relay-config-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("overlay.json");
        fs::write(&path, r#"{"context_length": 9}"#).expect("write overlay");

        temp_env::with_var(CONFIG_PATH_ENV, Some(path.as_os_str()), || {
            let overlay = ConfigOverlay::from_env().expect("parses").expect("present");
            assert_eq!(overlay.context_length, Some(9));
        });
        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            assert_eq!(ConfigOverlay::from_env().expect("unset"), None);
        });

        temp_env::with_var(CONFIG_PATH_ENV, Some(dir.join("missing.json").as_os_str()), || {
            assert!(matches!(
                ConfigOverlay::from_env(),
                Err(ClientError::InvalidConfig { .. })
            ));
        });
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn model_types_are_classified_from_config() {
        let config = Config::default();
        assert_eq!(config.model_type("dall-e-3"), Some(ModelType::TextToImage));
        assert_eq!(config.model_type("grok-2"), None);
    }
}
