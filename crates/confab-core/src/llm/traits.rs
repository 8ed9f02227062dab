use crate::error::ConfabError;
use crate::llm::provider::ProviderDescriptor;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One turn of the outgoing history, as sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Receiver side of a streaming generation.
///
/// An adapter calls `on_chunk` zero or more times with non-empty fragments,
/// in arrival order, then exactly one of `on_complete` / `on_error`. Once the
/// cancellation token fires the adapter makes no further calls at all, so a
/// cancelled stream ends silently.
pub trait StreamSink: Send {
    fn on_chunk(&mut self, text: &str);
    fn on_complete(&mut self);
    fn on_error(&mut self, error: ConfabError);
}

/// A protocol-specific translator from a provider's wire format to the
/// shared [`StreamSink`] interface.
///
/// Streaming failures never surface as a return value: they are routed
/// through `on_error`.
#[async_trait::async_trait]
pub trait ProtocolAdapter: Send + Sync {
    async fn stream(
        &self,
        provider: &ProviderDescriptor,
        messages: &[Message],
        cancel: &CancellationToken,
        sink: &mut dyn StreamSink,
    );
}
