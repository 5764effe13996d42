//! Extraction of plain results from provider-shaped response envelopes.
//!
//! Each provider has one [`ExtractionPath`] leading to its reply text. Walking
//! is strict: a missing key, an index past the end, or a value of the wrong
//! type fails with [`ClientError::MalformedResponse`] naming the deepest JSON
//! pointer reached. Nothing is silently defaulted.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::ClientError;
use crate::provider::ProviderTag;
use crate::types::{Embedding, Embeddings, ResponseEnvelope};

/// One step of an [`ExtractionPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(&key.replace('~', "~0").replace('/', "~1")),
            PathSegment::Index(idx) => write!(f, "{idx}"),
        }
    }
}

/// Ordered traversal through nested objects and arrays.
///
/// # Examples
///
/// ```
/// use llm_relay::normalize::{ExtractionPath, PathSegment};
///
/// let path = ExtractionPath::parse("/choices/0/message/content");
/// assert_eq!(path.segments()[1], PathSegment::Index(0));
/// assert_eq!(path.to_string(), "/choices/0/message/content");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPath(Vec<PathSegment>);

impl ExtractionPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Builds a path from JSON pointer syntax. All-digit tokens become array
    /// indices.
    pub fn parse(pointer: &str) -> Self {
        let segments = pointer
            .split('/')
            .filter(|token| !token.is_empty())
            .map(|token| match token.parse::<usize>() {
                Ok(idx) => PathSegment::Index(idx),
                Err(_) => PathSegment::Key(token.replace("~1", "/").replace("~0", "~")),
            })
            .collect();
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Follows the path through `value`, reporting where it broke off.
    pub fn walk<'v>(
        &self,
        value: &'v Value,
        provider: ProviderTag,
    ) -> Result<&'v Value, ClientError> {
        walk_from(value, &self.0, String::new(), provider).map(|(found, _)| found)
    }
}

impl fmt::Display for ExtractionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn walk_from<'v>(
    value: &'v Value,
    segments: &[PathSegment],
    mut reached: String,
    provider: ProviderTag,
) -> Result<(&'v Value, String), ClientError> {
    let mut current = value;
    for segment in segments {
        let step = format!("{reached}/{segment}");
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key).ok_or_else(|| {
                ClientError::malformed(provider, &step, format!("missing field `{key}`"))
            })?,
            (PathSegment::Index(idx), Value::Array(items)) => items.get(*idx).ok_or_else(|| {
                ClientError::malformed(
                    provider,
                    &step,
                    format!("index {idx} out of bounds for {} item(s)", items.len()),
                )
            })?,
            (PathSegment::Key(_), other) => {
                return Err(ClientError::malformed(
                    provider,
                    pointer_or_root(&reached),
                    format!("expected object, found {}", kind(other)),
                ));
            }
            (PathSegment::Index(_), other) => {
                return Err(ClientError::malformed(
                    provider,
                    pointer_or_root(&reached),
                    format!("expected array, found {}", kind(other)),
                ));
            }
        };
        reached = step;
    }
    Ok((current, reached))
}

fn pointer_or_root(reached: &str) -> &str {
    if reached.is_empty() { "/" } else { reached }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Per-provider text extraction rules plus embedding extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseNormalizer {
    text_rules: BTreeMap<ProviderTag, ExtractionPath>,
}

const CHOICE_CONTENT: &str = "/choices/0/message/content";

impl ResponseNormalizer {
    /// A normalizer with no rules at all.
    pub fn empty() -> Self {
        Self {
            text_rules: BTreeMap::new(),
        }
    }

    /// Rules for every built-in provider.
    pub fn builtin() -> Self {
        let mut text_rules = BTreeMap::new();
        for provider in ProviderTag::ALL {
            let pointer = match provider {
                ProviderTag::Anthropic => "/content/0/text",
                ProviderTag::Google => "/candidates/0/content/parts/0/text",
                ProviderTag::OpenAi
                | ProviderTag::Mistral
                | ProviderTag::LocalAi
                | ProviderTag::Ollama
                | ProviderTag::OpenRouter
                | ProviderTag::Xai => CHOICE_CONTENT,
            };
            text_rules.insert(provider, ExtractionPath::parse(pointer));
        }
        Self { text_rules }
    }

    /// Builder-style [`ResponseNormalizer::set_rule`].
    pub fn with_rule(mut self, provider: ProviderTag, path: ExtractionPath) -> Self {
        self.set_rule(provider, path);
        self
    }

    pub fn set_rule(&mut self, provider: ProviderTag, path: ExtractionPath) {
        self.text_rules.insert(provider, path);
    }

    pub fn remove_rule(&mut self, provider: ProviderTag) -> Option<ExtractionPath> {
        self.text_rules.remove(&provider)
    }

    pub fn rule(&self, provider: ProviderTag) -> Option<&ExtractionPath> {
        self.text_rules.get(&provider)
    }

    /// Extracts the reply text of a chat response.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::normalize::ResponseNormalizer;
    /// use llm_relay::provider::ProviderTag;
    /// use llm_relay::types::ResponseEnvelope;
    /// use serde_json::json;
    ///
    /// let envelope = ResponseEnvelope::new(json!({
    ///     "content": [{"type": "text", "text": "Hello from Claude"}]
    /// }));
    /// let text = ResponseNormalizer::builtin()
    ///     .extract_text(&envelope, ProviderTag::Anthropic)
    ///     .unwrap();
    /// assert_eq!(text, "Hello from Claude");
    /// ```
    ///
    /// # Errors
    ///
    /// [`ClientError::UnsupportedProvider`] when `provider` has no rule and
    /// [`ClientError::MalformedResponse`] when the envelope does not have the
    /// expected shape.
    pub fn extract_text(
        &self,
        envelope: &ResponseEnvelope,
        provider: ProviderTag,
    ) -> Result<String, ClientError> {
        let path = self
            .text_rules
            .get(&provider)
            .ok_or_else(|| ClientError::UnsupportedProvider {
                provider: provider.to_string(),
            })?;
        let (value, reached) =
            walk_from(envelope.data(), path.segments(), String::new(), provider)?;
        match value {
            Value::String(text) => Ok(text.clone()),
            other => Err(ClientError::malformed(
                provider,
                pointer_or_root(&reached),
                format!("expected string, found {}", kind(other)),
            )),
        }
    }

    /// Extracts embedding vectors in input order.
    ///
    /// Supported shapes: `data[*].embedding` (OpenAI-compatible providers),
    /// `embeddings[*].values` or `embedding.values` (Google) and `embeddings`
    /// or `embedding` holding raw vectors (Ollama).
    ///
    /// # Errors
    ///
    /// [`ClientError::UnimplementedCapability`] for providers without an
    /// embedding endpoint and [`ClientError::MalformedResponse`] for
    /// unexpected shapes.
    pub fn extract_embeddings(
        &self,
        envelope: &ResponseEnvelope,
        provider: ProviderTag,
    ) -> Result<Embeddings, ClientError> {
        let data = envelope.data();
        match provider {
            ProviderTag::Anthropic => Err(ClientError::UnimplementedCapability {
                provider,
                capability: "embed",
            }),
            ProviderTag::Google => {
                if data.get("embeddings").is_some() {
                    collect_vectors(data, provider, "/embeddings", Some("values"))
                } else {
                    let (values, reached) = walk_from(
                        data,
                        &ExtractionPath::parse("/embedding/values").0,
                        String::new(),
                        provider,
                    )?;
                    Ok(vec![to_vector(values, &reached, provider)?])
                }
            }
            ProviderTag::Ollama if data.get("data").is_none() => {
                if data.get("embeddings").is_some() {
                    collect_vectors(data, provider, "/embeddings", None)
                } else {
                    let (values, reached) = walk_from(
                        data,
                        &ExtractionPath::parse("/embedding").0,
                        String::new(),
                        provider,
                    )?;
                    Ok(vec![to_vector(values, &reached, provider)?])
                }
            }
            _ => collect_vectors(data, provider, "/data", Some("embedding")),
        }
    }
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Reads the array at `list_pointer`, taking `field` of each item (or the
/// item itself) as a vector.
fn collect_vectors(
    data: &Value,
    provider: ProviderTag,
    list_pointer: &str,
    field: Option<&str>,
) -> Result<Embeddings, ClientError> {
    let (list, reached) = walk_from(
        data,
        ExtractionPath::parse(list_pointer).segments(),
        String::new(),
        provider,
    )?;
    let items = list.as_array().ok_or_else(|| {
        ClientError::malformed(
            provider,
            reached.as_str(),
            format!("expected array, found {}", kind(list)),
        )
    })?;

    let mut vectors = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let item_pointer = format!("{reached}/{idx}");
        let (values, pointer) = match field {
            Some(field) => walk_from(
                item,
                &[PathSegment::Key(field.to_string())],
                item_pointer,
                provider,
            )?,
            None => (item, item_pointer),
        };
        vectors.push(to_vector(values, &pointer, provider)?);
    }
    Ok(vectors)
}

fn to_vector(
    value: &Value,
    pointer: &str,
    provider: ProviderTag,
) -> Result<Embedding, ClientError> {
    let items = value.as_array().ok_or_else(|| {
        ClientError::malformed(
            provider,
            pointer,
            format!("expected array of numbers, found {}", kind(value)),
        )
    })?;
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            item.as_f64().ok_or_else(|| {
                ClientError::malformed(
                    provider,
                    format!("{pointer}/{idx}"),
                    format!("expected number, found {}", kind(item)),
                )
            })
        })
        .collect()
}
