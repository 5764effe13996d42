//! Ordered interceptors wrapped around the terminal transport call.
//!
//! The first registered middleware is the outermost wrapper: it runs first on
//! the way in and last on the way out. Each middleware receives a [`Next`]
//! continuation and decides whether to call it:
//!
//! - not at all, short-circuiting the chain with its own result;
//! - once, the normal case;
//! - again after a failure, which only retry-style middlewares should do.
//!
//! Errors unwind outward through every entered frame unless a middleware
//! handles them explicitly.

use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::{Span, debug};

use crate::error::ClientError;
use crate::provider::ProviderTag;
use crate::transport::{ChatRequest, EmbedRequest, SpeakRequest, TranscribeRequest};
use crate::types::{CallParams, Prompt, ResponseEnvelope};

pub mod logging;
pub mod retry;

pub use logging::LoggingMiddleware;
pub use retry::RetryMiddleware;

/// Future produced by the innermost operation of a chain.
pub type TerminalFuture = BoxFuture<'static, Result<ResponseEnvelope, ClientError>>;

/// The innermost operation. It may be invoked more than once when a retry
/// middleware re-enters the chain, so it must be repeatable.
pub type Terminal = dyn Fn() -> TerminalFuture + Send + Sync;

/// Session operation a chain run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Chat,
    Embed,
    Transcribe,
    Speak,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Chat => "chat",
            Operation::Embed => "embed",
            Operation::Transcribe => "transcribe",
            Operation::Speak => "speak",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of the wrapped call, exactly as the transport receives them.
///
/// Chat prompts are already prefixed with conversation context and tools are
/// already resolved.
#[derive(Debug, Clone)]
pub enum CallRequest {
    Chat(Arc<ChatRequest>),
    Embed(Arc<EmbedRequest>),
    Transcribe(Arc<TranscribeRequest>),
    Speak(Arc<SpeakRequest>),
}

impl CallRequest {
    pub fn operation(&self) -> Operation {
        match self {
            CallRequest::Chat(_) => Operation::Chat,
            CallRequest::Embed(_) => Operation::Embed,
            CallRequest::Transcribe(_) => Operation::Transcribe,
            CallRequest::Speak(_) => Operation::Speak,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            CallRequest::Chat(request) => &request.model,
            CallRequest::Embed(request) => &request.model,
            CallRequest::Transcribe(request) => &request.model,
            CallRequest::Speak(request) => &request.model,
        }
    }

    /// Pass-through parameters, without the `tools` selection.
    pub fn params(&self) -> &CallParams {
        match self {
            CallRequest::Chat(request) => &request.params,
            CallRequest::Embed(request) => &request.params,
            CallRequest::Transcribe(request) => &request.params,
            CallRequest::Speak(request) => &request.params,
        }
    }

    /// The prompt sent for a chat call.
    pub fn prompt(&self) -> Option<&Prompt> {
        self.as_chat().map(|request| &request.prompt)
    }

    pub fn as_chat(&self) -> Option<&ChatRequest> {
        match self {
            CallRequest::Chat(request) => Some(request.as_ref()),
            _ => None,
        }
    }

    pub fn as_embed(&self) -> Option<&EmbedRequest> {
        match self {
            CallRequest::Embed(request) => Some(request.as_ref()),
            _ => None,
        }
    }

    pub fn as_transcribe(&self) -> Option<&TranscribeRequest> {
        match self {
            CallRequest::Transcribe(request) => Some(request.as_ref()),
            _ => None,
        }
    }

    pub fn as_speak(&self) -> Option<&SpeakRequest> {
        match self {
            CallRequest::Speak(request) => Some(request.as_ref()),
            _ => None,
        }
    }
}

macro_rules! impl_from_request {
    ($($variant:ident($request:ty)),* $(,)?) => {
        $(
            impl From<Arc<$request>> for CallRequest {
                fn from(request: Arc<$request>) -> Self {
                    CallRequest::$variant(request)
                }
            }

            impl From<$request> for CallRequest {
                fn from(request: $request) -> Self {
                    CallRequest::$variant(Arc::new(request))
                }
            }
        )*
    };
}

impl_from_request!(
    Chat(ChatRequest),
    Embed(EmbedRequest),
    Transcribe(TranscribeRequest),
    Speak(SpeakRequest),
);

/// What a middleware knows about the call it wraps: the session's settings
/// and the request itself.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub operation: Operation,
    pub provider: ProviderTag,
    pub model: String,
    pub request: CallRequest,
    /// Whether the session hands back raw envelopes.
    pub raw: bool,
    /// Timeout the session's transport was built with.
    pub timeout: Option<Duration>,
    /// The session's logger handle.
    pub span: Span,
}

impl CallContext {
    pub fn new(provider: ProviderTag, request: impl Into<CallRequest>) -> Self {
        let request = request.into();
        Self {
            operation: request.operation(),
            provider,
            model: request.model().to_string(),
            request,
            raw: false,
            timeout: None,
            span: Span::none(),
        }
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// Interceptor around a session operation.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(
        &self,
        ctx: &CallContext,
        next: Next<'_>,
    ) -> Result<ResponseEnvelope, ClientError>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Continuation into the rest of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    ctx: &'a CallContext,
    remaining: &'a [Arc<dyn Middleware>],
    terminal: &'a Terminal,
}

impl<'a> Next<'a> {
    /// Runs the remaining middlewares and, unless one of them short-circuits,
    /// the terminal operation.
    pub fn run(self) -> BoxFuture<'a, Result<ResponseEnvelope, ClientError>> {
        match self.remaining.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    remaining: rest,
                    ..self
                };
                head.call(self.ctx, next)
            }
            None => (self.terminal)(),
        }
    }

    pub fn context(&self) -> &'a CallContext {
        self.ctx
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("ctx", self.ctx)
            .field("remaining", &self.remaining.len())
            .finish_non_exhaustive()
    }
}

/// Shared, ordered list of middlewares.
///
/// The list is read fresh at every dispatch, so middlewares added or cleared
/// after a session was built apply to that session's next call.
#[derive(Default)]
pub struct MiddlewareChain {
    entries: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide chain used by sessions that were not given one.
    pub fn global() -> Arc<MiddlewareChain> {
        static GLOBAL: OnceLock<Arc<MiddlewareChain>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(MiddlewareChain::new())).clone()
    }

    /// Appends a middleware; it wraps everything registered after it.
    pub fn add(&self, middleware: impl Middleware + 'static) {
        self.add_shared(Arc::new(middleware));
    }

    pub fn add_shared(&self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = middleware.name(), "added middleware");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    pub fn clear(&self) {
        debug!("cleared middlewares");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current list; the lock is not held while a chain runs.
    pub fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Composes the current middlewares around `terminal` and runs them.
    pub async fn run(
        &self,
        ctx: &CallContext,
        terminal: &Terminal,
    ) -> Result<ResponseEnvelope, ClientError> {
        let entries = self.snapshot();
        Next {
            ctx,
            remaining: &entries,
            terminal,
        }
        .run()
        .await
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self.snapshot().iter().map(|m| m.name()).collect();
        f.debug_struct("MiddlewareChain")
            .field("entries", &names)
            .finish()
    }
}
