use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderTag;

/// Aggregates every failure mode exposed by a [`crate::client::ClientSession`].
///
/// Each variant carries the offending input so callers can branch on the kind
/// programmatically: resolution and validation kinds are raised before any I/O and
/// are never retried, while [`ClientError::is_transient`] marks the kinds a retry
/// middleware may recover from.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An explicit provider override names a provider with no configured rule.
    #[error("unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },
    /// No provider rule matches the model identifier.
    #[error("unsupported model: {model}")]
    UnsupportedModel { model: String },
    /// The provider requires an API key and none of its variables is set.
    #[error("missing credential for {provider}: set one of [{}]", .env_vars.join(", "))]
    MissingCredential {
        provider: ProviderTag,
        /// Candidate environment variables that were consulted, in order.
        env_vars: Vec<String>,
    },
    /// A requested tool name is not registered.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
    /// The `tools` argument is neither a list of names nor the all-tools sentinel.
    #[error("invalid tools argument: {message}")]
    InvalidToolsArgument { message: String },
    /// The response envelope lacks a field the extraction rule expects.
    #[error("malformed {provider} response at {path}: {message}")]
    MalformedResponse {
        provider: ProviderTag,
        /// JSON pointer of the deepest location that was reached.
        path: String,
        message: String,
    },
    /// The operation is not defined for the provider.
    #[error("{capability} is not implemented for provider {provider}")]
    UnimplementedCapability {
        provider: ProviderTag,
        capability: &'static str,
    },
    /// Network failure reported by the transport.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The transport gave up waiting for the provider.
    #[error("request timed out: {message}")]
    Timeout { message: String },
    /// The provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Optional wait suggested by the provider.
        retry_after: Option<Duration>,
    },
    /// Credentials were rejected by the provider.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Invalid request payload or arguments.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Provider-defined failure that does not fit another kind.
    #[error("provider {provider} error: {message}")]
    Provider { provider: String, message: String },
    /// Configuration could not be built or parsed.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
    /// Catches opaque or unexpected failures.
    #[error("unknown error: {message}")]
    Unknown { message: String },
}

impl ClientError {
    /// Creates a [`ClientError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::ClientError;
    ///
    /// let err = ClientError::transport("connection reset");
    /// assert!(matches!(err, ClientError::Transport { .. }));
    /// assert!(err.is_transient());
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a [`ClientError::RateLimit`] without a retry hint.
    pub fn rate_limit<T: Into<String>>(message: T) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a [`ClientError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::ClientError;
    ///
    /// let err = ClientError::provider("openai", "bad JSON payload");
    /// assert!(matches!(err, ClientError::Provider { .. }));
    /// assert!(!err.is_transient());
    /// ```
    pub fn provider<P: Into<String>, T: Into<String>>(provider: P, message: T) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a [`ClientError::Validation`].
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(
        provider: ProviderTag,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedResponse {
            provider,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for rate-limit and network-class failures.
    ///
    /// These are the only kinds [`crate::middleware::retry::RetryMiddleware`]
    /// re-invokes the chain for; everything else propagates on first occurrence.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Transport { .. } | Self::Timeout { .. }
        )
    }
}
