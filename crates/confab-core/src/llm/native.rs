use crate::constants::endpoints;
use crate::error::{ConfabError, Result};
use crate::llm::line_buffer::LineBuffer;
use crate::llm::provider::ProviderDescriptor;
use crate::llm::traits::*;
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Typed events of a native streaming session (Anthropic Messages API).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NativeEvent {
    MessageStart {
        #[serde(default)]
        message: Value,
    },
    ContentBlockStart {
        #[serde(default)]
        index: u32,
        #[serde(default)]
        content_block: Value,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: u32,
        delta: ContentDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: u32,
    },
    MessageDelta {
        #[serde(default)]
        delta: Value,
    },
    MessageStop,
    Ping,
    Error {
        error: NativeError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NativeError {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub message: String,
}

/// A provider-owned streaming session. `abort` must stop the upstream
/// request, not just the local reader.
#[async_trait::async_trait]
pub trait NativeMessageStream: Send {
    async fn next_event(&mut self) -> Option<Result<NativeEvent>>;
    fn abort(&mut self);
}

/// Opens native streaming sessions.
#[async_trait::async_trait]
pub trait NativeClient: Send + Sync {
    async fn open(
        &self,
        provider: &ProviderDescriptor,
        messages: &[Message],
    ) -> Result<Box<dyn NativeMessageStream>>;
}

/// Adapter for providers that expose their own typed event stream.
pub struct NativeAdapter {
    client: Arc<dyn NativeClient>,
}

impl NativeAdapter {
    pub fn new(client: Arc<dyn NativeClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ProtocolAdapter for NativeAdapter {
    async fn stream(
        &self,
        provider: &ProviderDescriptor,
        messages: &[Message],
        cancel: &CancellationToken,
        sink: &mut dyn StreamSink,
    ) {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = self.client.open(provider, messages) => opened,
        };
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                if !cancel.is_cancelled() {
                    sink.on_error(e);
                }
                return;
            }
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(provider = %provider.id, "Aborting native stream");
                    session.abort();
                    return;
                }
                event = session.next_event() => event,
            };

            if cancel.is_cancelled() {
                session.abort();
                return;
            }

            match event {
                Some(Ok(NativeEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta { text },
                    ..
                })) => {
                    if !text.is_empty() {
                        sink.on_chunk(&text);
                    }
                }
                Some(Ok(NativeEvent::MessageStop)) => {
                    sink.on_complete();
                    return;
                }
                Some(Ok(NativeEvent::Error { error })) => {
                    session.abort();
                    sink.on_error(ConfabError::Provider(format!(
                        "{}: {}",
                        error.kind, error.message
                    )));
                    return;
                }
                Some(Ok(other)) => debug!("Ignoring native event {other:?}"),
                Some(Err(e)) => {
                    session.abort();
                    sink.on_error(e);
                    return;
                }
                None => {
                    debug!("Native stream ended without message_stop");
                    sink.on_complete();
                    return;
                }
            }
        }
    }
}

// ─── Anthropic client ─────────────────────────────────────────────────────────

pub struct AnthropicClient {
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request_body(provider: &ProviderDescriptor, messages: &[Message]) -> Value {
        // Separate system messages from conversation messages
        let system_prompt: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let conv_messages: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": provider.model,
            "max_tokens": provider.max_tokens,
            "messages": conv_messages,
            "stream": true,
        });
        if !system_prompt.is_empty() {
            body["system"] = Value::String(system_prompt);
        }
        body
    }
}

#[async_trait::async_trait]
impl NativeClient for AnthropicClient {
    async fn open(
        &self,
        provider: &ProviderDescriptor,
        messages: &[Message],
    ) -> Result<Box<dyn NativeMessageStream>> {
        let url = provider.endpoint("/v1/messages");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", provider.credential_or_empty())
            .header("anthropic-version", endpoints::ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&Self::build_request_body(provider, messages))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ConfabError::status(status, text));
        }

        debug!(provider = %provider.id, "Native stream opened");
        Ok(Box::new(AnthropicStream::spawn(response.bytes_stream())))
    }
}

/// Owns the reader task; aborting it drops the response body, which closes
/// the upstream connection.
pub struct AnthropicStream {
    events: mpsc::UnboundedReceiver<Result<NativeEvent>>,
    reader: JoinHandle<()>,
}

impl AnthropicStream {
    pub(crate) fn spawn<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded();
        let reader = tokio::spawn(read_events(body, tx));
        Self { events: rx, reader }
    }
}

#[async_trait::async_trait]
impl NativeMessageStream for AnthropicStream {
    async fn next_event(&mut self) -> Option<Result<NativeEvent>> {
        self.events.next().await
    }

    fn abort(&mut self) {
        self.reader.abort();
        self.events.close();
    }
}

impl Drop for AnthropicStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_events<S, B, E>(body: S, tx: mpsc::UnboundedSender<Result<NativeEvent>>)
where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let mut body = std::pin::pin!(body);
    let mut buffer = LineBuffer::new();

    while let Some(chunk) = body.next().await {
        let lines = match chunk {
            Ok(bytes) => buffer.push(bytes.as_ref()),
            Err(e) => Err(ConfabError::Transport(e.to_string())),
        };
        let lines = match lines {
            Ok(lines) => lines,
            Err(e) => {
                let _ = tx.unbounded_send(Err(e));
                return;
            }
        };
        for line in lines {
            if let Some(event) = parse_event_line(&line) {
                if tx.unbounded_send(Ok(event)).is_err() {
                    return;
                }
            }
        }
    }

    if let Some(rest) = buffer.finish() {
        if let Some(event) = parse_event_line(&rest) {
            let _ = tx.unbounded_send(Ok(event));
        }
    }
}

/// `event:` lines are redundant with the `type` tag inside `data:`.
fn parse_event_line(line: &str) -> Option<NativeEvent> {
    let data = line.strip_prefix("data: ")?;
    match serde_json::from_str::<NativeEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed native event: {e}");
            None
        }
    }
}
