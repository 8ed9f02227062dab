use crate::error::ConfabError;
use crate::llm::provider::ProviderDescriptor;
use crate::llm::traits::*;
use crate::llm::transport::{self, Frame, LineHandler};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Adapter for backends that answer with one JSON object per line
/// (Ollama's `/api/chat`).
pub struct LineJsonAdapter {
    client: reqwest::Client,
}

impl LineJsonAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Decode a response body. Usable with any chunked byte source.
    pub async fn consume<S, B, E>(body: S, cancel: &CancellationToken, sink: &mut dyn StreamSink)
    where
        S: Stream<Item = Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: std::fmt::Display + Send,
    {
        transport::pump(body, cancel, sink, &mut JsonLines).await;
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

struct JsonLines;

impl LineHandler for JsonLines {
    fn line(&mut self, line: &str) -> Frame {
        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping malformed stream line: {e}");
                return Frame::Skip;
            }
        };

        if let Some(error) = chunk.error {
            return Frame::Fail(ConfabError::Provider(error));
        }
        if chunk.done {
            // The end of the body is what finishes the stream.
            debug!("Provider reported done");
        }
        match chunk.message {
            Some(message) if !message.content.is_empty() => Frame::Text(message.content),
            _ => Frame::Skip,
        }
    }
}

#[async_trait::async_trait]
impl ProtocolAdapter for LineJsonAdapter {
    async fn stream(
        &self,
        provider: &ProviderDescriptor,
        messages: &[Message],
        cancel: &CancellationToken,
        sink: &mut dyn StreamSink,
    ) {
        let url = provider.endpoint("/api/chat");
        let body = ChatRequest {
            model: &provider.model,
            messages,
            stream: true,
            options: ChatOptions {
                num_predict: provider.max_tokens,
            },
        };
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = provider.credential().ok().flatten() {
            request = request.bearer_auth(key);
        }

        debug!(provider = %provider.id, "Opening line-JSON stream to {url}");
        let Some(response) = transport::open(request, cancel, sink).await else {
            return;
        };
        Self::consume(response.bytes_stream(), cancel, sink).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<String>,
        completed: usize,
        errors: Vec<String>,
    }

    impl StreamSink for Recorder {
        fn on_chunk(&mut self, text: &str) {
            self.chunks.push(text.to_string());
        }
        fn on_complete(&mut self) {
            self.completed += 1;
        }
        fn on_error(&mut self, error: ConfabError) {
            self.errors.push(error.to_string());
        }
    }

    fn reads(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], String>> + Send {
        stream::iter(parts.iter().map(|p| Ok(p.as_bytes())).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_lines_split_mid_line_across_reads() {
        let body = reads(&[
            "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n{\"message\":{\"con",
            "tent\":\" there\"},\"done\":false}\n{\"done\":true}\n",
        ]);
        let mut sink = Recorder::default();
        LineJsonAdapter::consume(body, &CancellationToken::new(), &mut sink).await;

        assert_eq!(sink.chunks, vec!["Hi", " there"]);
        assert_eq!(sink.chunks.concat(), "Hi there");
        assert_eq!(sink.completed, 1);
        assert!(sink.errors.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let body = reads(&[
            "{\"message\":{\"content\":\"a\"}}\nnot json at all\n{\"message\":{\"content\":\"b\"}}\n",
        ]);
        let mut sink = Recorder::default();
        LineJsonAdapter::consume(body, &CancellationToken::new(), &mut sink).await;

        assert_eq!(sink.chunks, vec!["a", "b"]);
        assert_eq!(sink.completed, 1);
    }

    #[tokio::test]
    async fn test_unterminated_last_line_applied_at_end() {
        let body = reads(&["{\"message\":{\"content\":\"tail\"},\"done\":true}"]);
        let mut sink = Recorder::default();
        LineJsonAdapter::consume(body, &CancellationToken::new(), &mut sink).await;

        assert_eq!(sink.chunks, vec!["tail"]);
        assert_eq!(sink.completed, 1);
    }

    #[tokio::test]
    async fn test_error_line_fails_stream() {
        let body = reads(&[
            "{\"message\":{\"content\":\"x\"}}\n{\"error\":\"model not found\"}\n{\"message\":{\"content\":\"y\"}}\n",
        ]);
        let mut sink = Recorder::default();
        LineJsonAdapter::consume(body, &CancellationToken::new(), &mut sink).await;

        assert_eq!(sink.chunks, vec!["x"]);
        assert_eq!(sink.completed, 0);
        assert_eq!(sink.errors.len(), 1);
        assert!(sink.errors[0].contains("model not found"));
    }

    #[tokio::test]
    async fn test_read_error_is_transport_failure() {
        let body = stream::iter(vec![
            Ok(b"{\"message\":{\"content\":\"x\"}}\n".as_slice()),
            Err("connection reset".to_string()),
        ]);
        let mut sink = Recorder::default();
        LineJsonAdapter::consume(body, &CancellationToken::new(), &mut sink).await;

        assert_eq!(sink.chunks, vec!["x"]);
        assert_eq!(sink.completed, 0);
        assert!(sink.errors[0].contains("connection reset"));
    }

    #[tokio::test]
    async fn test_cancelled_token_silences_everything() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body = reads(&["{\"message\":{\"content\":\"x\"}}\n"]);
        let mut sink = Recorder::default();
        LineJsonAdapter::consume(body, &cancel, &mut sink).await;

        assert!(sink.chunks.is_empty());
        assert_eq!(sink.completed, 0);
        assert!(sink.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_reads_stops_delivery() {
        let cancel = CancellationToken::new();
        let waiting = tokio::sync::Notify::new();
        let first = stream::iter(vec![Ok::<_, String>(
            b"{\"message\":{\"content\":\"x\"}}\n".as_slice(),
        )]);
        let stalled = stream::once(async {
            waiting.notify_one();
            std::future::pending::<Result<&'static [u8], String>>().await
        });
        let body = first.chain(stalled).chain(reads(&["{\"done\":true}\n"]));

        let mut sink = Recorder::default();
        tokio::join!(LineJsonAdapter::consume(body, &cancel, &mut sink), async {
            waiting.notified().await;
            cancel.cancel();
        });

        assert_eq!(sink.chunks, vec!["x"]);
        assert_eq!(sink.completed, 0);
        assert!(sink.errors.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![Message::user("Hello")];
        let body = ChatRequest {
            model: "llama3.1",
            messages: &messages,
            stream: true,
            options: ChatOptions { num_predict: 16 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama3.1");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Hello");
    }
}
