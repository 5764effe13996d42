use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::ClientError;
use crate::types::ResponseEnvelope;

use super::{CallContext, Middleware, Next};

/// Logs the start and the end of every call with its duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn call(
        &self,
        ctx: &CallContext,
        next: Next<'_>,
    ) -> Result<ResponseEnvelope, ClientError> {
        info!(
            operation = %ctx.operation,
            provider = %ctx.provider,
            model = %ctx.model,
            "starting call"
        );
        let started = Instant::now();
        let result = next.run().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => info!(
                operation = %ctx.operation,
                provider = %ctx.provider,
                model = %ctx.model,
                elapsed_ms,
                "finished call"
            ),
            Err(err) => warn!(
                operation = %ctx.operation,
                provider = %ctx.provider,
                model = %ctx.model,
                elapsed_ms,
                error = %err,
                "call failed"
            ),
        }
        result
    }
}
