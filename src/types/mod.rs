//! Shared data structures flowing between callers, middlewares and transports.
//!
//! Provider responses stay opaque ([`ResponseEnvelope`]); only the
//! [`crate::normalize`] module looks inside them.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chat role string compatible with provider-specific semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn user() -> Self {
        Self("user".to_string())
    }

    pub fn assistant() -> Self {
        Self("assistant".to_string())
    }
}

/// A single turn of a structured conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Optional vendor-specific name attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::system(), content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::user(), content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::assistant(), content)
    }
}

/// What a caller hands to `chat`: either plain text or a message list.
///
/// Only plain text participates in context prefixing; structured lists are
/// forwarded as given.
///
/// # Examples
///
/// ```
/// use llm_relay::types::{Message, Prompt};
///
/// let plain: Prompt = "Hello".into();
/// assert!(!plain.is_structured());
///
/// let structured: Prompt = vec![Message::user("Hello")].into();
/// assert!(structured.is_structured());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    pub fn is_structured(&self) -> bool {
        matches!(self, Prompt::Messages(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Prompt::Text(text) => Some(text),
            Prompt::Messages(_) => None,
        }
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::Text(text) => f.write_str(text),
            Prompt::Messages(messages) => {
                for (idx, message) in messages.iter().enumerate() {
                    if idx > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}: {}", message.role.0, message.content)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Prompt {
    fn from(value: &str) -> Self {
        Prompt::Text(value.to_string())
    }
}

impl From<String> for Prompt {
    fn from(value: String) -> Self {
        Prompt::Text(value)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(value: Vec<Message>) -> Self {
        Prompt::Messages(value)
    }
}

/// Unprocessed provider response, kept verbatim as nested JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseEnvelope(Value);

impl ResponseEnvelope {
    pub fn new(data: Value) -> Self {
        Self(data)
    }

    pub fn data(&self) -> &Value {
        &self.0
    }

    /// Mutable access, mainly for middlewares that post-process responses.
    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Looks up a nested value by JSON pointer, e.g. `/choices/0/message/content`.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.0.pointer(pointer)
    }
}

impl From<Value> for ResponseEnvelope {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Result of a chat call, shaped by the session's raw-mode flag.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutput {
    /// Text extracted by the response normalizer.
    Text(String),
    /// Full provider envelope, returned in raw mode.
    Raw(ResponseEnvelope),
}

impl ChatOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChatOutput::Text(text) => Some(text),
            ChatOutput::Raw(_) => None,
        }
    }

    pub fn as_envelope(&self) -> Option<&ResponseEnvelope> {
        match self {
            ChatOutput::Raw(envelope) => Some(envelope),
            ChatOutput::Text(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ChatOutput::Raw(_))
    }
}

impl fmt::Display for ChatOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatOutput::Text(text) => f.write_str(text),
            ChatOutput::Raw(envelope) => write!(f, "{}", envelope.data()),
        }
    }
}

/// Pass-through parameters forwarded to the transport untouched
/// (`temperature`, `voice`, `language`, ...).
///
/// The `tools` key is reserved: `chat` removes it and resolves it against the
/// tool registry before the transport sees the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallParams(Map<String, Value>);

impl CallParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::types::CallParams;
    ///
    /// let params = CallParams::new().with("temperature", 0.2).with("voice", "alloy");
    /// assert_eq!(params.get("voice").and_then(|v| v.as_str()), Some("alloy"));
    /// ```
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for CallParams {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// Input of an embedding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbedInput {
    pub fn len(&self) -> usize {
        match self {
            EmbedInput::Single(_) => 1,
            EmbedInput::Batch(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for EmbedInput {
    fn from(value: &str) -> Self {
        EmbedInput::Single(value.to_string())
    }
}

impl From<String> for EmbedInput {
    fn from(value: String) -> Self {
        EmbedInput::Single(value)
    }
}

impl From<Vec<String>> for EmbedInput {
    fn from(value: Vec<String>) -> Self {
        EmbedInput::Batch(value)
    }
}

/// One embedding vector.
pub type Embedding = Vec<f64>;

/// Embedding vectors in input order.
pub type Embeddings = Vec<Embedding>;

/// Audio handed to a transcription call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioInput {
    /// Local file the transport reads itself.
    Path { path: PathBuf },
    /// In-memory audio bytes.
    Bytes {
        data: Vec<u8>,
        mime_type: Option<String>,
    },
}

impl AudioInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        AudioInput::Path { path: path.into() }
    }
}

/// Output format requested from a transcription call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    Text,
    Srt,
    Vtt,
    #[default]
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_prompt_renders_roles() {
        let prompt = Prompt::from(vec![Message::system("be brief"), Message::user("hi")]);
        assert_eq!(prompt.to_string(), "system: be brief\nuser: hi");
    }

    #[test]
    fn prompt_deserializes_either_shape() {
        let text: Prompt = serde_json::from_value(json!("hello")).expect("text");
        assert_eq!(text, Prompt::Text("hello".into()));

        let list: Prompt =
            serde_json::from_value(json!([{"role": "user", "content": "hello"}])).expect("list");
        assert_eq!(list, Prompt::Messages(vec![Message::user("hello")]));
    }

    #[test]
    fn envelope_pointer_reaches_nested_data() {
        let envelope = ResponseEnvelope::new(json!({
            "choices": [{"message": {"content": "hi"}}]
        }));
        assert_eq!(
            envelope.pointer("/choices/0/message/content"),
            Some(&json!("hi"))
        );
        assert_eq!(envelope.pointer("/choices/1"), None);
    }

    #[test]
    fn raw_output_displays_compact_json() {
        let output = ChatOutput::Raw(ResponseEnvelope::new(json!({"a": 1})));
        assert_eq!(output.to_string(), "{\"a\":1}");
        assert!(output.is_raw());
        assert_eq!(output.as_text(), None);
    }
}
