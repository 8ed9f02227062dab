use crate::constants::conversation::EVENT_CHANNEL_CAPACITY;
use crate::conversation::persistence::{PersistedState, ThreadPersistence};
use crate::conversation::title::{TitleGenerator, TruncatingTitleGenerator};
use crate::conversation::types::{ChatMessage, Thread};
use crate::error::Result;
use crate::llm::Role;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Change notifications for rendering collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ThreadCreated { thread_id: String },
    ThreadDeleted { thread_id: String },
    ThreadRenamed { thread_id: String, title: String },
    MessageUpserted { thread_id: String, message: ChatMessage },
    SelectionChanged { thread_id: Option<String> },
}

#[derive(Debug, Default)]
struct StoreState {
    /// Most recent first.
    threads: Vec<Thread>,
    current: Option<String>,
    dirty: bool,
}

impl StoreState {
    fn thread_mut(&mut self, id: &str) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    fn snapshot(&self) -> PersistedState {
        PersistedState {
            threads: self.threads.clone(),
            current_thread_id: self.current.clone(),
        }
    }
}

/// Owns every thread and message. All mutation goes through this type, one
/// writer at a time.
pub struct ConversationStore {
    state: Mutex<StoreState>,
    events: broadcast::Sender<StoreEvent>,
    titles: Box<dyn TitleGenerator>,
    persistence: Option<ThreadPersistence>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// An in-memory store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(StoreState::default()),
            events,
            titles: Box::new(TruncatingTitleGenerator),
            persistence: None,
        }
    }

    /// A store backed by a JSON file, loaded eagerly.
    pub fn open(persistence: ThreadPersistence) -> Result<Self> {
        let loaded = persistence.load()?;
        debug!(
            "Loaded {} threads from {}",
            loaded.threads.len(),
            persistence.path().display()
        );
        let store = Self::new();
        {
            let mut state = store.lock();
            state.current = loaded
                .current_thread_id
                .filter(|id| loaded.threads.iter().any(|t| &t.id == id));
            state.threads = loaded.threads;
        }
        Ok(Self {
            persistence: Some(persistence),
            ..store
        })
    }

    pub fn with_title_generator(mut self, titles: Box<dyn TitleGenerator>) -> Self {
        self.titles = titles;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic while holding the lock cannot leave a thread half-written:
        // every mutation replaces whole values.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    /// Create an empty thread at the front of the list and select it.
    pub fn create_thread(&self) -> String {
        let thread = Thread::new();
        let id = thread.id.clone();
        {
            let mut state = self.lock();
            state.threads.insert(0, thread);
            state.current = Some(id.clone());
            state.dirty = true;
            self.emit(StoreEvent::ThreadCreated {
                thread_id: id.clone(),
            });
            self.emit(StoreEvent::SelectionChanged {
                thread_id: Some(id.clone()),
            });
        }
        self.flush_or_warn();
        id
    }

    /// Remove a thread. Deleting the selected thread selects the most recent
    /// remaining one, if any.
    pub fn delete_thread(&self, thread_id: &str) -> bool {
        {
            let mut state = self.lock();
            let before = state.threads.len();
            state.threads.retain(|t| t.id != thread_id);
            if state.threads.len() == before {
                return false;
            }
            state.dirty = true;
            self.emit(StoreEvent::ThreadDeleted {
                thread_id: thread_id.to_string(),
            });
            if state.current.as_deref() == Some(thread_id) {
                state.current = state.threads.first().map(|t| t.id.clone());
                self.emit(StoreEvent::SelectionChanged {
                    thread_id: state.current.clone(),
                });
            }
        }
        self.flush_or_warn();
        true
    }

    pub fn rename_thread(&self, thread_id: &str, title: impl Into<String>) -> bool {
        let title = title.into();
        {
            let mut state = self.lock();
            let Some(thread) = state.thread_mut(thread_id) else {
                return false;
            };
            thread.title = title.clone();
            state.dirty = true;
            self.emit(StoreEvent::ThreadRenamed {
                thread_id: thread_id.to_string(),
                title,
            });
        }
        self.flush_or_warn();
        true
    }

    pub fn select_thread(&self, thread_id: &str) -> bool {
        {
            let mut state = self.lock();
            if !state.threads.iter().any(|t| t.id == thread_id) {
                return false;
            }
            state.current = Some(thread_id.to_string());
            state.dirty = true;
            self.emit(StoreEvent::SelectionChanged {
                thread_id: state.current.clone(),
            });
        }
        self.flush_or_warn();
        true
    }

    /// Insert a message, or replace the message with the same id in place.
    ///
    /// Returns `None` without touching anything when the thread does not
    /// exist or the message is a system message. The first user message of a
    /// thread names it.
    pub fn upsert_message(&self, thread_id: &str, message: ChatMessage) -> Option<String> {
        if message.role == Role::System {
            warn!(thread = thread_id, "Refusing to store a system message");
            return None;
        }
        let mut state = self.lock();
        let Some(thread) = state.thread_mut(thread_id) else {
            warn!(
                thread = thread_id,
                message = %message.id,
                "Dropping upsert for a thread that does not exist"
            );
            return None;
        };

        let id = message.id.clone();
        let first_user_message = thread.messages.is_empty() && message.role == Role::User;

        match thread.messages.iter().position(|m| m.id == id) {
            Some(index) => thread.messages[index] = message.clone(),
            None => thread.messages.push(message.clone()),
        }
        thread.updated_at = thread.updated_at.max(Utc::now());

        let renamed = if first_user_message {
            let title = self.titles.generate(&message.content);
            thread.title = title.clone();
            Some(title)
        } else {
            None
        };

        state.dirty = true;
        self.emit(StoreEvent::MessageUpserted {
            thread_id: thread_id.to_string(),
            message,
        });
        if let Some(title) = renamed {
            self.emit(StoreEvent::ThreadRenamed {
                thread_id: thread_id.to_string(),
                title,
            });
        }
        Some(id)
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.lock().threads.clone()
    }

    pub fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.lock().threads.iter().find(|t| t.id == thread_id).cloned()
    }

    pub fn message(&self, thread_id: &str, message_id: &str) -> Option<ChatMessage> {
        self.lock()
            .threads
            .iter()
            .find(|t| t.id == thread_id)
            .and_then(|t| t.message(message_id).cloned())
    }

    pub fn current_thread_id(&self) -> Option<String> {
        self.lock().current.clone()
    }

    pub fn thread_exists(&self, thread_id: &str) -> bool {
        self.lock().threads.iter().any(|t| t.id == thread_id)
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Write pending changes to disk. A no-op for in-memory stores.
    pub fn flush(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let snapshot = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.snapshot()
        };
        if let Err(e) = persistence.save(&snapshot) {
            self.lock().dirty = true;
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn flush_or_warn(&self) {
        if let Err(e) = self.flush() {
            warn!("Failed to persist threads: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::conversation::DEFAULT_THREAD_TITLE;
    use crate::conversation::persistence::ThreadPersistence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct CountingTitles(Arc<AtomicUsize>);

    impl TitleGenerator for CountingTitles {
        fn generate(&self, first_message: &str) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            first_message.to_uppercase()
        }
    }

    #[test]
    fn test_create_thread_goes_to_front_and_is_selected() {
        let store = ConversationStore::new();
        let first = store.create_thread();
        let second = store.create_thread();

        let ids: Vec<String> = store.threads().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second.clone(), first]);
        assert_eq!(store.current_thread_id(), Some(second));
    }

    #[test]
    fn test_upsert_twice_is_idempotent() {
        let store = ConversationStore::new();
        let thread_id = store.create_thread();
        let message = ChatMessage::user("Hello");

        store.upsert_message(&thread_id, message.clone());
        let once = store.thread(&thread_id).unwrap().messages;
        store.upsert_message(&thread_id, message.clone());
        let twice = store.thread(&thread_id).unwrap().messages;

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let store = ConversationStore::new();
        let thread_id = store.create_thread();
        let user = ChatMessage::user("q");
        let reply = ChatMessage::assistant("H");
        store.upsert_message(&thread_id, user.clone());
        store.upsert_message(&thread_id, reply.clone());
        store.upsert_message(&thread_id, ChatMessage::user("q2"));
        store.upsert_message(&thread_id, reply.with_content("Hello"));

        let messages = store.thread(&thread_id).unwrap().messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, user.id);
        assert_eq!(messages[1].id, reply.id);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[2].content, "q2");
    }

    #[test]
    fn test_updated_at_never_decreases() {
        let store = ConversationStore::new();
        let thread_id = store.create_thread();
        let mut last = store.thread(&thread_id).unwrap().updated_at;
        for i in 0..5 {
            store.upsert_message(&thread_id, ChatMessage::user(format!("m{i}")));
            let now = store.thread(&thread_id).unwrap().updated_at;
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_title_generated_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = ConversationStore::new()
            .with_title_generator(Box::new(CountingTitles(calls.clone())));
        let thread_id = store.create_thread();

        let first = ChatMessage::user("hello");
        store.upsert_message(&thread_id, first.clone());
        store.upsert_message(&thread_id, first.clone());
        store.upsert_message(&thread_id, ChatMessage::assistant("hi"));
        store.upsert_message(&thread_id, ChatMessage::user("again"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.thread(&thread_id).unwrap().title, "HELLO");
    }

    #[test]
    fn test_assistant_first_message_does_not_name_thread() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = ConversationStore::new()
            .with_title_generator(Box::new(CountingTitles(calls.clone())));
        let thread_id = store.create_thread();
        store.upsert_message(&thread_id, ChatMessage::assistant("greeting"));
        store.upsert_message(&thread_id, ChatMessage::user("question"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_upsert_into_missing_thread_is_noop() {
        let store = ConversationStore::new();
        let existing = store.create_thread();
        assert!(store
            .upsert_message("no-such-thread", ChatMessage::user("x"))
            .is_none());
        assert!(store.thread(&existing).unwrap().messages.is_empty());
    }

    #[test]
    fn test_delete_current_selects_next_most_recent() {
        let store = ConversationStore::new();
        let oldest = store.create_thread();
        let middle = store.create_thread();
        let newest = store.create_thread();

        assert!(store.delete_thread(&newest));
        assert_eq!(store.current_thread_id(), Some(middle.clone()));

        store.select_thread(&oldest);
        assert!(store.delete_thread(&middle));
        assert_eq!(store.current_thread_id(), Some(oldest.clone()));

        assert!(store.delete_thread(&oldest));
        assert_eq!(store.current_thread_id(), None);
        assert!(!store.delete_thread(&oldest));
    }

    #[test]
    fn test_rename_thread() {
        let store = ConversationStore::new();
        let id = store.create_thread();
        assert!(store.rename_thread(&id, "Trip planning"));
        assert_eq!(store.thread(&id).unwrap().title, "Trip planning");
        assert!(!store.rename_thread("missing", "x"));
    }

    #[test]
    fn test_events_are_published_in_order() {
        let store = ConversationStore::new();
        let mut events = store.subscribe();
        let id = store.create_thread();
        let message = ChatMessage::user("Hello");
        store.upsert_message(&id, message.clone());

        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::ThreadCreated {
                thread_id: id.clone()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::SelectionChanged {
                thread_id: Some(id.clone())
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::MessageUpserted {
                thread_id: id.clone(),
                message
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::ThreadRenamed {
                thread_id: id,
                title: "Hello".to_string()
            }
        );
    }

    #[test]
    fn test_system_message_is_not_stored() {
        let store = ConversationStore::new();
        let thread_id = store.create_thread();
        let mut events = store.subscribe();

        let mut message = ChatMessage::user("Be brief.");
        message.role = Role::System;
        assert_eq!(store.upsert_message(&thread_id, message), None);

        let thread = store.thread(&thread_id).unwrap();
        assert!(thread.messages.is_empty());
        assert_eq!(thread.title, DEFAULT_THREAD_TITLE);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_selection_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("threads.json");

        let older = {
            let store = ConversationStore::open(ThreadPersistence::new(&path)).unwrap();
            let older = store.create_thread();
            let newer = store.create_thread();
            store.flush().unwrap();
            assert_eq!(store.current_thread_id(), Some(newer));

            assert!(store.select_thread(&older));
            older
        };

        let reopened = ConversationStore::open(ThreadPersistence::new(&path)).unwrap();
        assert_eq!(reopened.current_thread_id(), Some(older));
    }

    #[test]
    fn test_persistent_store_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("threads.json");

        let thread_id = {
            let store = ConversationStore::open(ThreadPersistence::new(&path)).unwrap();
            let id = store.create_thread();
            store.upsert_message(&id, ChatMessage::user("Persist me"));
            store.flush().unwrap();
            id
        };

        let reopened = ConversationStore::open(ThreadPersistence::new(&path)).unwrap();
        let thread = reopened.thread(&thread_id).unwrap();
        assert_eq!(thread.title, "Persist me");
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(reopened.current_thread_id(), Some(thread_id));
    }
}
