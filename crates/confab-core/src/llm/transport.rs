//! HTTP plumbing shared by the line-oriented adapters: a cancellable request
//! send and a read loop that turns body bytes into sink calls.

use crate::error::ConfabError;
use crate::llm::line_buffer::LineBuffer;
use crate::llm::traits::StreamSink;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What one complete line of a response body amounts to.
#[derive(Debug)]
pub(crate) enum Frame {
    Text(String),
    Skip,
    Fail(ConfabError),
}

/// Per-protocol interpretation of body lines.
pub(crate) trait LineHandler: Send {
    fn line(&mut self, line: &str) -> Frame;

    /// Bytes left in the buffer when the body ended without a newline.
    fn tail(&mut self, rest: &str) -> Frame {
        self.line(rest)
    }
}

/// Send a request, racing it against the token. Returns `None` when
/// cancelled; a non-2xx status is reported through the sink.
pub(crate) async fn open(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
    sink: &mut dyn StreamSink,
) -> Option<reqwest::Response> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        response = request.send() => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            sink.on_error(ConfabError::Http(e));
            return None;
        }
    };

    let status = response.status();
    if status.is_success() {
        return Some(response);
    }

    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        body = response.text() => body.unwrap_or_default(),
    };
    sink.on_error(ConfabError::status(status, body));
    None
}

/// Drive a body to its end, feeding complete lines to `handler` and
/// forwarding text in order. Checks the token at every read boundary and
/// before every sink call.
pub(crate) async fn pump<S, B, E>(
    body: S,
    cancel: &CancellationToken,
    sink: &mut dyn StreamSink,
    handler: &mut dyn LineHandler,
) where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let mut body = std::pin::pin!(body);
    let mut buffer = LineBuffer::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("stream cancelled between reads");
                return;
            }
            next = body.next() => next,
        };

        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                if !cancel.is_cancelled() {
                    sink.on_error(ConfabError::Transport(e.to_string()));
                }
                return;
            }
            None => break,
        };

        let lines = match buffer.push(bytes.as_ref()) {
            Ok(lines) => lines,
            Err(e) => {
                if !cancel.is_cancelled() {
                    sink.on_error(e);
                }
                return;
            }
        };

        for line in lines {
            if !deliver(handler.line(&line), cancel, sink) {
                return;
            }
        }
    }

    if let Some(rest) = buffer.finish() {
        if !deliver(handler.tail(&rest), cancel, sink) {
            return;
        }
    }

    if !cancel.is_cancelled() {
        sink.on_complete();
    }
}

/// Returns false once the stream must stop.
fn deliver(frame: Frame, cancel: &CancellationToken, sink: &mut dyn StreamSink) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    match frame {
        Frame::Text(text) => {
            if !text.is_empty() {
                sink.on_chunk(&text);
            }
            true
        }
        Frame::Skip => true,
        Frame::Fail(e) => {
            sink.on_error(e);
            false
        }
    }
}
