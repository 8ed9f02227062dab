use crate::constants::markers::{ERROR_PREFIX, STOPPED, WITHOUT_CONTEXT, WITH_CONTEXT};
use crate::conversation::{ChatMessage, ConversationStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Dispatching,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Dispatching | Self::Streaming)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Transient state of one in-flight turn.
///
/// Every transition writes through the store; the session only remembers
/// which assistant message it owns. Transitions out of a terminal phase are
/// refused, so the first terminal event wins and late callbacks are no-ops.
#[derive(Debug)]
pub struct GenerationSession {
    id: u64,
    thread_id: String,
    provider_id: String,
    assistant: Option<ChatMessage>,
    accumulated: String,
    augmented: bool,
    phase: TurnPhase,
    error: Option<String>,
    token: CancellationToken,
}

impl GenerationSession {
    pub fn new(
        id: u64,
        thread_id: impl Into<String>,
        provider_id: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            thread_id: thread_id.into(),
            provider_id: provider_id.into(),
            assistant: None,
            accumulated: String::new(),
            augmented: false,
            phase: TurnPhase::Dispatching,
            error: None,
            token,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn assistant_message_id(&self) -> Option<&str> {
        self.assistant.as_ref().map(|m| m.id.as_str())
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn outcome(&self) -> Option<TurnOutcome> {
        match self.phase {
            TurnPhase::Completed => Some(TurnOutcome::Completed),
            TurnPhase::Cancelled => Some(TurnOutcome::Cancelled),
            TurnPhase::Failed => Some(TurnOutcome::Failed(
                self.error.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    /// Dispatching → Streaming.
    pub fn begin_streaming(&mut self, augmented: bool) -> bool {
        if self.phase != TurnPhase::Dispatching || self.token.is_cancelled() {
            return false;
        }
        self.augmented = augmented;
        self.phase = TurnPhase::Streaming;
        true
    }

    /// Apply one chunk. The first chunk creates the assistant message; later
    /// chunks re-upsert it with the full accumulated text.
    pub fn apply_chunk(&mut self, store: &ConversationStore, text: &str) -> bool {
        if self.phase != TurnPhase::Streaming || self.token.is_cancelled() {
            debug!(session = self.id, "Ignoring chunk for inactive session");
            return false;
        }
        if text.is_empty() {
            return true;
        }

        self.accumulated.push_str(text);
        let message = match &self.assistant {
            Some(existing) => existing.with_content(self.accumulated.clone()),
            None => {
                let created = ChatMessage::assistant(self.accumulated.clone());
                self.assistant = Some(created.clone());
                created
            }
        };
        store.upsert_message(&self.thread_id, message);
        true
    }

    /// Streaming → Completed. Writes the provenance annotation.
    pub fn complete(&mut self, store: &ConversationStore) -> bool {
        if self.phase != TurnPhase::Streaming || self.token.is_cancelled() {
            return false;
        }
        let annotation = if self.augmented {
            WITH_CONTEXT
        } else {
            WITHOUT_CONTEXT
        };
        let content = if self.accumulated.is_empty() {
            annotation.trim_start().to_string()
        } else {
            format!("{}{}", self.accumulated, annotation)
        };
        self.write_final(store, content);
        self.finish(TurnPhase::Completed);
        true
    }

    /// Dispatching/Streaming → Cancelled. Triggers the token. Creates no
    /// message when nothing had streamed yet.
    pub fn cancel(&mut self, store: &ConversationStore) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.token.cancel();
        if self.assistant.is_some() {
            let content = format!("{}{}", self.accumulated, STOPPED);
            self.write_final(store, content);
        }
        self.finish(TurnPhase::Cancelled);
        true
    }

    /// Dispatching/Streaming → Failed. Keeps any partial output and appends
    /// the error, creating the assistant message if needed.
    pub fn fail(&mut self, store: &ConversationStore, message: impl Into<String>) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        let message = message.into();
        let notice = format!("{ERROR_PREFIX}{message}");
        let content = if self.accumulated.is_empty() {
            notice
        } else {
            format!("{}\n\n{}", self.accumulated, notice)
        };
        self.write_final(store, content);
        self.error = Some(message);
        self.finish(TurnPhase::Failed);
        true
    }

    fn write_final(&mut self, store: &ConversationStore, content: String) {
        let message = match &self.assistant {
            Some(existing) => existing.with_content(content),
            None => {
                let created = ChatMessage::assistant(content);
                self.assistant = Some(created.clone());
                created
            }
        };
        store.upsert_message(&self.thread_id, message);
    }

    fn finish(&mut self, phase: TurnPhase) {
        info!(
            session = self.id,
            provider = %self.provider_id,
            chars = self.accumulated.len(),
            "Session {:?}",
            phase
        );
        self.phase = phase;
        self.accumulated.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ConversationStore, String, GenerationSession) {
        let store = ConversationStore::new();
        let thread_id = store.create_thread();
        store.upsert_message(&thread_id, ChatMessage::user("Hello"));
        let session = GenerationSession::new(1, &thread_id, "llama3", CancellationToken::new());
        (store, thread_id, session)
    }

    fn contents(store: &ConversationStore, thread_id: &str) -> Vec<String> {
        store
            .thread(thread_id)
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.content)
            .collect()
    }

    #[test]
    fn test_first_chunk_creates_message_later_chunks_replace_it() {
        let (store, thread_id, mut session) = setup();
        assert!(session.begin_streaming(false));
        assert!(session.assistant_message_id().is_none());

        session.apply_chunk(&store, "Hi");
        let id = session.assistant_message_id().unwrap().to_string();
        session.apply_chunk(&store, " there!");

        assert_eq!(session.assistant_message_id(), Some(id.as_str()));
        assert_eq!(contents(&store, &thread_id), vec!["Hello", "Hi there!"]);
    }

    #[test]
    fn test_complete_appends_provenance() {
        let (store, thread_id, mut session) = setup();
        session.begin_streaming(true);
        session.apply_chunk(&store, "Answer");
        assert!(session.complete(&store));

        assert_eq!(session.phase(), TurnPhase::Completed);
        assert_eq!(
            contents(&store, &thread_id)[1],
            format!("Answer{WITH_CONTEXT}")
        );
        assert!(session.accumulated_text().is_empty());
        assert_eq!(session.outcome(), Some(TurnOutcome::Completed));
    }

    #[test]
    fn test_cancel_before_first_chunk_creates_nothing() {
        let (store, thread_id, mut session) = setup();
        session.begin_streaming(false);
        assert!(session.cancel(&store));

        assert!(session.token().is_cancelled());
        assert_eq!(contents(&store, &thread_id), vec!["Hello"]);
        assert_eq!(session.outcome(), Some(TurnOutcome::Cancelled));
    }

    #[test]
    fn test_cancel_appends_stopped_marker_once() {
        let (store, thread_id, mut session) = setup();
        session.begin_streaming(false);
        session.apply_chunk(&store, "Partial");
        assert!(session.cancel(&store));
        assert!(!session.cancel(&store));
        assert!(!session.apply_chunk(&store, " late"));
        assert!(!session.complete(&store));

        let messages = contents(&store, &thread_id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], format!("Partial{STOPPED}"));
        assert_eq!(messages[1].matches(STOPPED.trim()).count(), 1);
    }

    #[test]
    fn test_fail_keeps_partial_output() {
        let (store, thread_id, mut session) = setup();
        session.begin_streaming(false);
        session.apply_chunk(&store, "Half an ans");
        assert!(session.fail(&store, "connection reset"));

        let messages = contents(&store, &thread_id);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].starts_with("Half an ans"));
        assert!(messages[1].ends_with("Error: connection reset"));
        assert_eq!(
            session.outcome(),
            Some(TurnOutcome::Failed("connection reset".into()))
        );
    }

    #[test]
    fn test_fail_during_dispatch_creates_error_message() {
        let (store, thread_id, mut session) = setup();
        assert!(session.fail(&store, "missing key"));
        assert_eq!(
            contents(&store, &thread_id),
            vec!["Hello", "Error: missing key"]
        );
        assert!(!session.begin_streaming(false));
    }

    #[test]
    fn test_streaming_refused_after_token_cancelled() {
        let (_store, _thread_id, mut session) = setup();
        session.token().cancel();
        assert!(!session.begin_streaming(false));
        assert_eq!(session.phase(), TurnPhase::Dispatching);
    }

    #[test]
    fn test_empty_completion_still_writes_annotation() {
        let (store, thread_id, mut session) = setup();
        session.begin_streaming(false);
        assert!(session.complete(&store));
        assert_eq!(contents(&store, &thread_id)[1], WITHOUT_CONTEXT.trim_start());
    }
}
