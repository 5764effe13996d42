//! One call surface over many LLM backends.
//!
//! A [`ClientSession`] resolves its provider from the model name, prefixes
//! conversation context, runs every call through a shared middleware chain and
//! turns provider-shaped responses into plain text. Network I/O is delegated
//! to a caller-supplied [`transport::Transport`].

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod normalize;
pub mod provider;
pub mod tools;
pub mod transport;
pub mod types;

pub use client::{ClientSession, ClientSessionBuilder};
pub use config::{Config, ConfigOverlay};
pub use error::ClientError;
pub use middleware::{Middleware, MiddlewareChain};
pub use provider::ProviderTag;
pub use tools::{ToolRegistry, ToolSpec};
pub use transport::{DynTransport, Transport};
pub use types::*;
