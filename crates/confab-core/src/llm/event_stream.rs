use crate::error::ConfabError;
use crate::llm::provider::ProviderDescriptor;
use crate::llm::traits::*;
use crate::llm::transport::{self, Frame, LineHandler};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Adapter for server-sent-event backends whose envelopes carry
/// `candidates[0].content.parts[]` (Gemini `streamGenerateContent`).
pub struct EventStreamAdapter {
    client: reqwest::Client,
}

impl EventStreamAdapter {
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
        transport::pump(body, cancel, sink, &mut DataEvents::default()).await;
    }

    fn build_request_body(provider: &ProviderDescriptor, messages: &[Message]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                serde_json::json!({
                    "role": role,
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": { "maxOutputTokens": provider.max_tokens },
        });
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": system.join("\n\n") }],
            });
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Default)]
struct DataEvents {
    parse_attempts: usize,
}

impl DataEvents {
    fn parse(&mut self, payload: &str) -> Frame {
        self.parse_attempts += 1;
        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Skipping malformed event payload: {e}");
                return Frame::Skip;
            }
        };

        if let Some(error) = envelope.error {
            return Frame::Fail(ConfabError::Provider(error.message));
        }

        // Parts within one envelope are joined into a single chunk.
        let text: String = envelope
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            Frame::Skip
        } else {
            Frame::Text(text)
        }
    }
}

impl LineHandler for DataEvents {
    fn line(&mut self, line: &str) -> Frame {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Frame::Skip;
        };
        if payload.trim() == DONE_SENTINEL {
            return Frame::Skip;
        }
        self.parse(payload)
    }

    fn tail(&mut self, rest: &str) -> Frame {
        debug!("Parsing {} unterminated bytes at end of stream", rest.len());
        let payload = rest.strip_prefix(DATA_PREFIX).unwrap_or(rest);
        if payload.trim() == DONE_SENTINEL {
            return Frame::Skip;
        }
        self.parse(payload)
    }
}

#[async_trait::async_trait]
impl ProtocolAdapter for EventStreamAdapter {
    async fn stream(
        &self,
        provider: &ProviderDescriptor,
        messages: &[Message],
        cancel: &CancellationToken,
        sink: &mut dyn StreamSink,
    ) {
        let url = provider.endpoint(&format!(
            "/v1beta/models/{}:streamGenerateContent?alt=sse",
            provider.model
        ));
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", provider.credential_or_empty())
            .json(&Self::build_request_body(provider, messages));

        debug!(provider = %provider.id, "Opening event stream to {url}");
        let Some(response) = transport::open(request, cancel, sink).await else {
            return;
        };
        Self::consume(response.bytes_stream(), cancel, sink).await;
    }
}
