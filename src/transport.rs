//! Seam to the per-provider network clients.
//!
//! Wire protocols live outside this crate. A [`Transport`] receives an
//! already-shaped request and hands back the provider's response untouched as
//! a [`ResponseEnvelope`]; sessions never inspect anything else about it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::Span;

use crate::error::ClientError;
use crate::provider::ProviderTag;
use crate::tools::ToolSpec;
use crate::types::{AudioInput, CallParams, EmbedInput, Prompt, ResponseEnvelope, TranscriptFormat};

/// Chat request after tool resolution and context prefixing.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: Prompt,
    /// Resolved tools. Empty when the caller requested none.
    pub tools: Vec<ToolSpec>,
    pub params: CallParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedRequest {
    pub model: String,
    pub input: EmbedInput,
    pub params: CallParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeRequest {
    pub model: String,
    pub audio: AudioInput,
    pub format: TranscriptFormat,
    pub params: CallParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    pub model: String,
    pub text: String,
    pub params: CallParams,
}

/// Provider client driven by a session.
///
/// Only `chat` is mandatory; the other operations report
/// [`ClientError::UnimplementedCapability`] unless overridden. Failures should
/// use the transport-side error kinds (`RateLimit`, `Transport`, `Timeout`,
/// `Auth`, ...) so retry middlewares can tell transient ones apart.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ResponseEnvelope, ClientError>;

    async fn embed(&self, request: EmbedRequest) -> Result<ResponseEnvelope, ClientError> {
        let _ = request;
        Err(self.unimplemented("embed"))
    }

    async fn transcribe(
        &self,
        request: TranscribeRequest,
    ) -> Result<ResponseEnvelope, ClientError> {
        let _ = request;
        Err(self.unimplemented("transcribe"))
    }

    async fn speak(&self, request: SpeakRequest) -> Result<ResponseEnvelope, ClientError> {
        let _ = request;
        Err(self.unimplemented("speak"))
    }

    /// Provider this transport talks to.
    fn provider(&self) -> ProviderTag;

    fn unimplemented(&self, capability: &'static str) -> ClientError {
        ClientError::UnimplementedCapability {
            provider: self.provider(),
            capability,
        }
    }
}

/// Thread-safe transport handle.
pub type DynTransport = Arc<dyn Transport>;

/// Construction parameters handed to a [`TransportFactory`].
#[derive(Clone)]
pub struct TransportSettings {
    /// `None` only for providers that do not require a credential.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    /// Provider options from configuration, minus `base_url`.
    pub options: Map<String, Value>,
    /// Logger handle of the owning session.
    pub span: Span,
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Builds the transport for a resolved provider.
///
/// Any `Fn(ProviderTag, TransportSettings) -> Result<DynTransport, ClientError>`
/// closure is a factory.
pub trait TransportFactory: Send + Sync {
    fn build(
        &self,
        provider: ProviderTag,
        settings: TransportSettings,
    ) -> Result<DynTransport, ClientError>;
}

impl<F> TransportFactory for F
where
    F: Fn(ProviderTag, TransportSettings) -> Result<DynTransport, ClientError> + Send + Sync,
{
    fn build(
        &self,
        provider: ProviderTag,
        settings: TransportSettings,
    ) -> Result<DynTransport, ClientError> {
        self(provider, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ChatOnly;

    #[async_trait]
    impl Transport for ChatOnly {
        async fn chat(&self, request: ChatRequest) -> Result<ResponseEnvelope, ClientError> {
            Ok(ResponseEnvelope::new(json!({"echo": request.prompt.to_string()})))
        }

        fn provider(&self) -> ProviderTag {
            ProviderTag::Anthropic
        }
    }

    #[tokio::test]
    async fn optional_operations_default_to_unimplemented() {
        let transport = ChatOnly;
        let err = transport
            .speak(SpeakRequest {
                model: "claude-3".into(),
                text: "hello".into(),
                params: CallParams::new(),
            })
            .await
            .expect_err("speak is not implemented");
        match err {
            ClientError::UnimplementedCapability {
                provider,
                capability,
            } => {
                assert_eq!(provider, ProviderTag::Anthropic);
                assert_eq!(capability, "speak");
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn closures_are_factories() {
        let factory = |provider: ProviderTag,
                       settings: TransportSettings|
         -> Result<DynTransport, ClientError> {
            assert_eq!(provider, ProviderTag::Anthropic);
            assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
            Ok(Arc::new(ChatOnly))
        };
        let settings = TransportSettings {
            api_key: Some("sk-test".into()),
            base_url: None,
            timeout: None,
            options: Map::new(),
            span: Span::none(),
        };
        let transport = factory
            .build(ProviderTag::Anthropic, settings)
            .expect("build");
        assert_eq!(transport.provider(), ProviderTag::Anthropic);
    }

    #[test]
    fn settings_debug_redacts_api_key() {
        let settings = TransportSettings {
            api_key: Some("sk-secret".into()),
            base_url: Some("http://localhost:11434".into()),
            timeout: Some(Duration::from_secs(30)),
            options: Map::new(),
            span: Span::none(),
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-secret"), "{rendered}");
        assert!(rendered.contains("<redacted>"));
    }
}
