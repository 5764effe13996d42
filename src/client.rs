//! Client sessions: one model, one transport, one conversation.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{Instrument, Span, debug, info_span};

use crate::config::{self, Config};
use crate::context::{ContextBuffer, ContextEntry};
use crate::error::ClientError;
use crate::middleware::{
    CallContext, CallRequest, Middleware, MiddlewareChain, Terminal, TerminalFuture,
};
use crate::normalize::ResponseNormalizer;
use crate::provider::{ModelType, ProviderTag};
use crate::tools::{ToolRegistry, ToolSelection, ToolSpec};
use crate::transport::{
    ChatRequest, DynTransport, EmbedRequest, SpeakRequest, TranscribeRequest, TransportFactory,
    TransportSettings,
};
use crate::types::{
    AudioInput, CallParams, ChatOutput, EmbedInput, Embeddings, Prompt, ResponseEnvelope,
    TranscriptFormat,
};

/// Call parameter holding a tool selection for `chat`.
pub const TOOLS_PARAM: &str = "tools";

/// Per-session mutable state, serialized behind one mutex.
#[derive(Debug)]
struct SessionState {
    context: ContextBuffer,
    raw: bool,
    context_length: usize,
    last_response: Option<ResponseEnvelope>,
}

/// A client bound to one model and provider.
///
/// Sessions are independent of each other apart from the middleware chain,
/// tool registry and configuration defaults they share. A session may be
/// shared across tasks; its own context and flags are kept consistent by an
/// internal lock that is never held across an `await`.
pub struct ClientSession {
    provider: ProviderTag,
    model: String,
    transport: DynTransport,
    config: Config,
    middlewares: Arc<MiddlewareChain>,
    tools: Arc<ToolRegistry>,
    normalizer: ResponseNormalizer,
    default_tools: Option<ToolSelection>,
    span: Span,
    state: Mutex<SessionState>,
}

impl ClientSession {
    /// Starts building a session for `model`.
    pub fn builder(model: impl Into<String>) -> ClientSessionBuilder {
        ClientSessionBuilder::new(model)
    }

    /// Registers a tool in the process-wide registry.
    pub fn register_tool(spec: ToolSpec) {
        ToolRegistry::global().register(spec);
    }

    /// Removes a tool from the process-wide registry.
    pub fn disable_tool(name: &str) -> bool {
        ToolRegistry::global().disable(name)
    }

    /// Appends a middleware to the process-wide chain.
    pub fn add_middleware(middleware: impl Middleware + 'static) {
        MiddlewareChain::global().add(middleware);
    }

    pub fn clear_middlewares() {
        MiddlewareChain::global().clear();
    }

    /// Changes the process-wide configuration defaults.
    pub fn configure<F>(update: F)
    where
        F: FnOnce(&mut Config),
    {
        config::configure(update);
    }

    /// Sends a chat turn.
    ///
    /// A `tools` entry in `params` (a list of names or `"all"`) is resolved
    /// against the registry and removed from the pass-through parameters;
    /// without one, the session's default selection applies. Plain-text
    /// prompts are prefixed with the conversation so far.
    ///
    /// Returns the provider envelope in raw mode and the extracted text
    /// otherwise. The envelope is kept as [`ClientSession::last_response`] in
    /// both cases.
    ///
    /// # Errors
    ///
    /// Tool resolution failures are returned before the transport is called.
    /// Transport failures come back unchanged unless a middleware handles them.
    pub async fn chat(
        &self,
        prompt: impl Into<Prompt>,
        mut params: CallParams,
    ) -> Result<ChatOutput, ClientError> {
        let prompt = prompt.into();
        let tools = self.resolve_tools(&mut params)?;

        let effective = {
            let state = self.state();
            state.context.add_context(prompt.clone(), state.context_length)
        };
        let request = Arc::new(ChatRequest {
            model: self.model.clone(),
            prompt: effective,
            tools,
            params,
        });
        let terminal = transport_terminal(
            self.transport.clone(),
            request.clone(),
            |transport, request| async move { transport.chat(request).await },
        );
        let envelope = self.dispatch(CallRequest::Chat(request), &terminal).await?;
        self.finish_chat(prompt, envelope)
    }

    /// Embeds a single text or a list of texts in one call.
    pub async fn embed(
        &self,
        input: impl Into<EmbedInput>,
        params: CallParams,
    ) -> Result<Embeddings, ClientError> {
        let request = Arc::new(EmbedRequest {
            model: self.model.clone(),
            input: input.into(),
            params,
        });
        let terminal = transport_terminal(
            self.transport.clone(),
            request.clone(),
            |transport, request| async move { transport.embed(request).await },
        );
        let envelope = self.dispatch(CallRequest::Embed(request), &terminal).await?;
        self.store_response(envelope.clone());
        self.normalizer.extract_embeddings(&envelope, self.provider)
    }

    /// Embeds `inputs` in chunks of `batch_size`, one chunk at a time.
    ///
    /// Every chunk, the first included, is preceded by the configured
    /// `batch_delay`. Vectors are returned in input order.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for a zero `batch_size`; otherwise the
    /// first failing chunk's error, after which no further chunks are sent.
    pub async fn batch_embed(
        &self,
        inputs: Vec<String>,
        batch_size: usize,
        params: CallParams,
    ) -> Result<Embeddings, ClientError> {
        if batch_size == 0 {
            return Err(ClientError::validation("batch_size must be at least 1"));
        }

        let mut vectors = Vec::with_capacity(inputs.len());
        for (idx, chunk) in inputs.chunks(batch_size).enumerate() {
            tokio::time::sleep(self.config.batch_delay).await;
            debug!(
                parent: &self.span,
                batch = idx,
                size = chunk.len(),
                "embedding batch"
            );
            let embedded = self
                .embed(EmbedInput::Batch(chunk.to_vec()), params.clone())
                .await?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Transcribes audio; the provider's response is returned as is.
    pub async fn transcribe(
        &self,
        audio: AudioInput,
        format: TranscriptFormat,
        params: CallParams,
    ) -> Result<ResponseEnvelope, ClientError> {
        let request = Arc::new(TranscribeRequest {
            model: self.model.clone(),
            audio,
            format,
            params,
        });
        let terminal = transport_terminal(
            self.transport.clone(),
            request.clone(),
            |transport, request| async move { transport.transcribe(request).await },
        );
        let envelope = self.dispatch(CallRequest::Transcribe(request), &terminal).await?;
        self.store_response(envelope.clone());
        Ok(envelope)
    }

    /// Synthesizes speech; the provider's response is returned as is.
    pub async fn speak(
        &self,
        text: impl Into<String>,
        params: CallParams,
    ) -> Result<ResponseEnvelope, ClientError> {
        let request = Arc::new(SpeakRequest {
            model: self.model.clone(),
            text: text.into(),
            params,
        });
        let terminal = transport_terminal(
            self.transport.clone(),
            request.clone(),
            |transport, request| async move { transport.speak(request).await },
        );
        let envelope = self.dispatch(CallRequest::Speak(request), &terminal).await?;
        self.store_response(envelope.clone());
        Ok(envelope)
    }

    pub fn provider(&self) -> ProviderTag {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_type(&self) -> Option<ModelType> {
        self.config.model_type(&self.model)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    /// The session's logger handle.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Configuration snapshot taken at construction.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn middlewares(&self) -> &Arc<MiddlewareChain> {
        &self.middlewares
    }

    /// Envelope of the most recent successful call.
    pub fn last_response(&self) -> Option<ResponseEnvelope> {
        self.state().last_response.clone()
    }

    pub fn response(&self) -> Option<ResponseEnvelope> {
        self.last_response()
    }

    /// Text extracted from the most recent response, if there is one.
    pub fn content(&self) -> Result<Option<String>, ClientError> {
        self.last_response()
            .map(|envelope| self.normalizer.extract_text(&envelope, self.provider))
            .transpose()
    }

    pub fn text(&self) -> Result<Option<String>, ClientError> {
        self.content()
    }

    pub fn raw(&self) -> bool {
        self.state().raw
    }

    pub fn set_raw(&self, raw: bool) {
        self.state().raw = raw;
    }

    pub fn context_length(&self) -> usize {
        self.state().context_length
    }

    /// Changes the window size. A smaller window trims the buffer on the next
    /// recorded exchange.
    pub fn set_context_length(&self, context_length: usize) {
        self.state().context_length = context_length;
    }

    /// Recorded exchanges from oldest to newest.
    pub fn context(&self) -> Vec<ContextEntry> {
        self.state().context.to_vec()
    }

    pub fn clear_context(&self) {
        self.state().context.clear();
        debug!(parent: &self.span, "cleared context");
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_response(&self, envelope: ResponseEnvelope) {
        self.state().last_response = Some(envelope);
    }

    fn resolve_tools(&self, params: &mut CallParams) -> Result<Vec<ToolSpec>, ClientError> {
        let selection = match params.remove(TOOLS_PARAM) {
            Some(Value::Null) => None,
            Some(value) => Some(ToolSelection::try_from(&value)?),
            None => self.default_tools.clone(),
        };
        match selection {
            Some(selection) => self.tools.select(&selection),
            None => Ok(Vec::new()),
        }
    }

    fn finish_chat(
        &self,
        prompt: Prompt,
        envelope: ResponseEnvelope,
    ) -> Result<ChatOutput, ClientError> {
        let mut state = self.state();
        state.last_response = Some(envelope.clone());
        let output = if state.raw {
            ChatOutput::Raw(envelope)
        } else {
            ChatOutput::Text(self.normalizer.extract_text(&envelope, self.provider)?)
        };
        let max_len = state.context_length;
        state.context.record(prompt, output.clone(), max_len);
        Ok(output)
    }

    async fn dispatch(
        &self,
        request: CallRequest,
        terminal: &Terminal,
    ) -> Result<ResponseEnvelope, ClientError> {
        let ctx = CallContext::new(self.provider, request)
            .with_raw(self.raw())
            .with_timeout(self.config.timeout)
            .with_span(self.span.clone());
        self.middlewares
            .run(&ctx, terminal)
            .instrument(self.span.clone())
            .await
    }
}

/// Wraps one transport call as a repeatable chain terminal. Each invocation
/// sends a fresh copy of `request`.
fn transport_terminal<R, F, Fut>(
    transport: DynTransport,
    request: Arc<R>,
    send: F,
) -> impl Fn() -> TerminalFuture + Send + Sync
where
    R: Clone + Send + Sync + 'static,
    F: Fn(DynTransport, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseEnvelope, ClientError>> + Send + 'static,
{
    move || send(transport.clone(), R::clone(&request)).boxed()
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("raw", &self.raw())
            .field("context_length", &self.context_length())
            .finish_non_exhaustive()
    }
}

enum TransportSource {
    Unset,
    Direct(DynTransport),
    Factory(Arc<dyn TransportFactory>),
}

/// Builder for [`ClientSession`].
///
/// Anything not set here comes from [`Config::load`], or from an explicit
/// [`ClientSessionBuilder::config`].
pub struct ClientSessionBuilder {
    model: String,
    provider: Option<ProviderTag>,
    provider_name: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    raw: Option<bool>,
    context_length: Option<usize>,
    batch_delay: Option<Duration>,
    config: Option<Config>,
    middlewares: Option<Arc<MiddlewareChain>>,
    tools: Option<Arc<ToolRegistry>>,
    default_tools: Option<ToolSelection>,
    normalizer: Option<ResponseNormalizer>,
    span: Option<Span>,
    transport: TransportSource,
}

impl ClientSessionBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            provider_name: None,
            api_key: None,
            base_url: None,
            timeout: None,
            raw: None,
            context_length: None,
            batch_delay: None,
            config: None,
            middlewares: None,
            tools: None,
            default_tools: None,
            normalizer: None,
            span: None,
            transport: TransportSource::Unset,
        }
    }

    /// Skips rule matching and uses `provider`, which must still have a rule.
    pub fn provider(mut self, provider: ProviderTag) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Like [`ClientSessionBuilder::provider`], parsed at build time.
    pub fn provider_name(mut self, provider: impl Into<String>) -> Self {
        self.provider_name = Some(provider.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn context_length(mut self, context_length: usize) -> Self {
        self.context_length = Some(context_length);
        self
    }

    pub fn batch_delay(mut self, batch_delay: Duration) -> Self {
        self.batch_delay = Some(batch_delay);
        self
    }

    /// Uses `config` instead of the process-wide defaults and overlay file.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn middlewares(mut self, middlewares: Arc<MiddlewareChain>) -> Self {
        self.middlewares = Some(middlewares);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Tools offered on chat calls that do not pass their own selection.
    pub fn default_tools(mut self, selection: ToolSelection) -> Self {
        self.default_tools = Some(selection);
        self
    }

    pub fn normalizer(mut self, normalizer: ResponseNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Logger handle; defaults to an `llm_relay.session` span.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Uses an already built transport. No credential lookup happens.
    pub fn transport(mut self, transport: DynTransport) -> Self {
        self.transport = TransportSource::Direct(transport);
        self
    }

    /// Builds the transport once the provider is known.
    pub fn transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.transport = TransportSource::Factory(Arc::new(factory));
        self
    }

    /// Resolves the provider and constructs the session.
    ///
    /// # Errors
    ///
    /// - [`ClientError::UnsupportedProvider`] / [`ClientError::UnsupportedModel`]
    ///   from provider resolution;
    /// - [`ClientError::MissingCredential`] when a factory is used, the
    ///   provider needs a key, and none was given or found in the environment;
    /// - [`ClientError::InvalidConfig`] when no transport was supplied or the
    ///   overlay file is unreadable.
    pub fn build(self) -> Result<ClientSession, ClientError> {
        let mut config = match self.config {
            Some(config) => config,
            None => Config::load()?,
        };
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(raw) = self.raw {
            config.return_raw = raw;
        }
        if let Some(context_length) = self.context_length {
            config.context_length = context_length;
        }
        if let Some(batch_delay) = self.batch_delay {
            config.batch_delay = batch_delay;
        }

        let explicit = match (self.provider, self.provider_name.as_deref()) {
            (Some(provider), _) => Some(provider),
            (None, Some(name)) => Some(name.parse::<ProviderTag>()?),
            (None, None) => None,
        };
        let provider = config.provider_rules.resolve(&self.model, explicit)?;
        let span = self.span.unwrap_or_else(|| {
            info_span!("llm_relay.session", provider = %provider, model = %self.model)
        });

        let transport = match self.transport {
            TransportSource::Direct(transport) => transport,
            TransportSource::Factory(factory) => {
                let api_key = self.api_key.or_else(|| config.api_key_for(provider));
                if api_key.is_none() && provider.requires_credential() {
                    return Err(ClientError::MissingCredential {
                        provider,
                        env_vars: config.env_vars_for(provider).to_vec(),
                    });
                }
                let mut options = config.provider_options(provider);
                options.remove("base_url");
                let settings = TransportSettings {
                    api_key,
                    base_url: self.base_url.or_else(|| config.base_url_for(provider)),
                    timeout: config.timeout,
                    options,
                    span: span.clone(),
                };
                factory.build(provider, settings)?
            }
            TransportSource::Unset => {
                return Err(ClientError::InvalidConfig {
                    field: "transport".to_string(),
                    reason: "no transport or transport factory was supplied".to_string(),
                });
            }
        };

        debug!(parent: &span, provider = %provider, model = %self.model, "built client session");

        let state = SessionState {
            context: ContextBuffer::new(),
            raw: config.return_raw,
            context_length: config.context_length,
            last_response: None,
        };
        Ok(ClientSession {
            provider,
            model: self.model,
            transport,
            config,
            middlewares: self.middlewares.unwrap_or_else(MiddlewareChain::global),
            tools: self.tools.unwrap_or_else(ToolRegistry::global),
            normalizer: self.normalizer.unwrap_or_default(),
            default_tools: self.default_tools,
            span,
            state: Mutex::new(state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Echoes the prompt back in an OpenAI-shaped envelope.
    struct DummyTransport {
        provider: ProviderTag,
    }

    #[async_trait]
    impl Transport for DummyTransport {
        async fn chat(&self, request: ChatRequest) -> Result<ResponseEnvelope, ClientError> {
            Ok(ResponseEnvelope::new(json!({
                "choices": [{"message": {"content": format!("echo: {}", request.prompt)}}]
            })))
        }

        fn provider(&self) -> ProviderTag {
            self.provider
        }
    }

    fn dummy_factory(
        seen: Arc<StdMutex<Vec<TransportSettings>>>,
    ) -> impl TransportFactory + 'static {
        move |provider: ProviderTag,
              settings: TransportSettings|
              -> Result<DynTransport, ClientError> {
            seen.lock().expect("seen").push(settings);
            Ok(Arc::new(DummyTransport { provider }))
        }
    }

    fn isolated(model: &str) -> ClientSessionBuilder {
        ClientSession::builder(model)
            .config(Config::default())
            .middlewares(Arc::new(MiddlewareChain::new()))
            .tools(Arc::new(ToolRegistry::new()))
    }

    #[test]
    fn build_resolves_provider_from_model() {
        let session = isolated("mistral-large")
            .transport(Arc::new(DummyTransport {
                provider: ProviderTag::Mistral,
            }))
            .build()
            .expect("session");
        assert_eq!(session.provider(), ProviderTag::Mistral);
        assert_eq!(session.model(), "mistral-large");
        assert_eq!(session.context_length(), 5);
        assert!(!session.raw());
    }

    #[test]
    fn build_rejects_unknown_models_and_providers() {
        let transport: DynTransport = Arc::new(DummyTransport {
            provider: ProviderTag::OpenAi,
        });
        match isolated("foo-bar").transport(transport.clone()).build() {
            Err(ClientError::UnsupportedModel { model }) => assert_eq!(model, "foo-bar"),
            other => panic!("unexpected result: {other:?}"),
        }
        match isolated("gpt-4")
            .provider_name("bedrock")
            .transport(transport)
            .build()
        {
            Err(ClientError::UnsupportedProvider { provider }) => assert_eq!(provider, "bedrock"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn build_without_transport_is_config_error() {
        assert!(matches!(
            isolated("gpt-4").build(),
            Err(ClientError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn factory_requires_credential_for_hosted_providers() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        temp_env::with_vars_unset(["ANTHROPIC_API_KEY"], || {
            match isolated("claude-3")
                .transport_factory(dummy_factory(seen.clone()))
                .build()
            {
                Err(ClientError::MissingCredential { provider, env_vars }) => {
                    assert_eq!(provider, ProviderTag::Anthropic);
                    assert_eq!(env_vars, vec!["ANTHROPIC_API_KEY".to_string()]);
                }
                other => panic!("unexpected result: {other:?}"),
            }
        });
        assert!(seen.lock().expect("seen").is_empty());
    }

    #[test]
    fn factory_receives_env_key_and_default_base_url() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        temp_env::with_var("ANTHROPIC_API_KEY", Some("sk-ant"), || {
            isolated("claude-3")
                .timeout(Duration::from_secs(20))
                .transport_factory(dummy_factory(seen.clone()))
                .build()
                .expect("anthropic session");
        });
        isolated("llama-3")
            .transport_factory(dummy_factory(seen.clone()))
            .build()
            .expect("local providers need no key");

        let seen = seen.lock().expect("seen");
        assert_eq!(seen[0].api_key.as_deref(), Some("sk-ant"));
        assert_eq!(seen[0].timeout, Some(Duration::from_secs(20)));
        assert_eq!(seen[1].api_key, None);
        assert_eq!(seen[1].base_url.as_deref(), Some("http://localhost:11434"));
    }

    #[test]
    fn explicit_settings_beat_config() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let mut config = Config::default();
        config.providers.insert(
            ProviderTag::Ollama,
            json!({"base_url": "http://gpu-box:11434", "keep_alive": "5m"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        ClientSession::builder("nomic-embed-text")
            .config(config)
            .base_url("http://override:11434")
            .middlewares(Arc::new(MiddlewareChain::new()))
            .transport_factory(dummy_factory(seen.clone()))
            .build()
            .expect("session");

        let seen = seen.lock().expect("seen");
        assert_eq!(seen[0].base_url.as_deref(), Some("http://override:11434"));
        assert_eq!(seen[0].options.get("keep_alive"), Some(&json!("5m")));
        assert!(!seen[0].options.contains_key("base_url"));
    }

    #[tokio::test]
    async fn chat_returns_text_and_records_context() {
        let session = isolated("gpt-4")
            .transport(Arc::new(DummyTransport {
                provider: ProviderTag::OpenAi,
            }))
            .build()
            .expect("session");

        let reply = session.chat("Hi", CallParams::new()).await.expect("chat");
        assert_eq!(reply, ChatOutput::Text("echo: Hi".into()));
        assert_eq!(session.content().expect("content").as_deref(), Some("echo: Hi"));

        let second = session.chat("Again", CallParams::new()).await.expect("chat");
        assert_eq!(
            second.as_text(),
            Some("echo: User: Hi\nBot: echo: Hi\nUser: Again\nBot:")
        );
        assert_eq!(session.context().len(), 2);

        session.clear_context();
        assert!(session.context().is_empty());
    }
}
