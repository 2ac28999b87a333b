//! The model-invocation seam.
//!
//! The runner never talks HTTP directly; it calls a [`ModelClient`]. The
//! production implementation is [`OpenRouterClient`](super::openrouter::OpenRouterClient);
//! tests plug in scripted fakes.

use crate::error::AgentError;
use crate::{ChatCompletion, Message, ToolDef};
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by [`ModelClient::send_request`].
pub type ModelFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatCompletion, AgentError>> + Send + 'a>>;

/// Sends one chat-completion request.
///
/// Contract:
/// - Once `cancel` fires, the returned future must resolve promptly with
///   [`AgentError::Cancelled`].
/// - A model that cannot serve the request (unknown, no tool support) is
///   reported as [`AgentError::ModelUnsupported`].
/// - Any other failure is [`AgentError::Model`].
pub trait ModelClient: Send + Sync {
    fn send_request<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
        cancel: &'a CancellationToken,
    ) -> ModelFuture<'a>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str {
        "unknown"
    }
}
