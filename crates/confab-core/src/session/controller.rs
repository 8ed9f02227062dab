use crate::context::Augmenter;
use crate::conversation::{ChatMessage, ConversationStore};
use crate::error::{ConfabError, Result};
use crate::llm::{
    AdapterTable, Message, ProtocolAdapter, ProviderDescriptor, ProviderRegistry, Role, StreamSink,
};
use crate::session::classify::{classify, user_message, Termination};
use crate::session::state::{GenerationSession, TurnOutcome, TurnPhase};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-turn overrides.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Provider id; the registry default when `None`.
    pub provider: Option<String>,
    pub page_hint: Option<String>,
    /// Whether to augment this turn; the controller default when `None`.
    pub augment: Option<bool>,
}

/// A dispatched turn.
pub struct TurnHandle {
    session_id: u64,
    thread_id: String,
    handle: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Resolves once the session reaches a terminal phase.
    pub async fn wait(self) -> TurnOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => TurnOutcome::Cancelled,
            Err(e) => TurnOutcome::Failed(format!("Generation task failed: {e}")),
        }
    }
}

struct ActiveSession {
    id: u64,
    session: Arc<Mutex<GenerationSession>>,
}

type ActiveSlot = Arc<Mutex<Option<ActiveSession>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives generation turns against the conversation store.
///
/// At most one session is active in the process. Starting a turn cancels
/// the active one synchronously, so its "stopped" marker is written before
/// the new turn dispatches. Locks are always taken in the order
/// active slot, session, store.
#[derive(Clone)]
pub struct GenerationController {
    store: Arc<ConversationStore>,
    providers: Arc<RwLock<ProviderRegistry>>,
    adapters: AdapterTable,
    augmenter: Option<Augmenter>,
    augment_by_default: bool,
    system_prompt: Option<String>,
    active: ActiveSlot,
    next_id: Arc<AtomicU64>,
}

impl GenerationController {
    pub fn new(
        store: Arc<ConversationStore>,
        providers: ProviderRegistry,
        adapters: AdapterTable,
    ) -> Self {
        Self {
            store,
            providers: Arc::new(RwLock::new(providers)),
            adapters,
            augmenter: None,
            augment_by_default: false,
            system_prompt: None,
            active: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_augmenter(mut self, augmenter: Augmenter, enabled_by_default: bool) -> Self {
        self.augmenter = Some(augmenter);
        self.augment_by_default = enabled_by_default;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Phase of the active session, `Idle` when there is none.
    pub fn phase(&self) -> TurnPhase {
        lock(&self.active)
            .as_ref()
            .map(|active| lock(&active.session).phase())
            .unwrap_or(TurnPhase::Idle)
    }

    pub fn default_provider(&self) -> String {
        self.registry().default_provider().to_string()
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.registry().all().into_iter().cloned().collect()
    }

    pub fn set_provider(&self, id: &str) -> Result<()> {
        let mut providers = self.providers.write().unwrap_or_else(|p| p.into_inner());
        if !providers.contains(id) {
            return Err(ConfabError::UnknownProvider(id.to_string()));
        }
        providers.set_default_provider(id);
        info!("Default provider set to {id}");
        Ok(())
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, ProviderRegistry> {
        self.providers.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Start a turn in the current thread, creating one if none is selected.
    ///
    /// Returns an error without touching the network when the provider is
    /// unknown or missing a credential; the thread then carries an error
    /// message.
    pub fn start_turn(&self, text: &str, options: TurnOptions) -> Result<TurnHandle> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConfabError::EmptyInput);
        }

        let mut active = lock(&self.active);
        self.cancel_locked(&mut active);

        let thread_id = match self.store.current_thread_id() {
            Some(id) if self.store.thread_exists(&id) => id,
            _ => self.store.create_thread(),
        };
        self.store.upsert_message(&thread_id, ChatMessage::user(text));
        self.dispatch(&mut active, thread_id, text.to_string(), options)
    }

    /// Re-dispatch the latest user message of the current thread. The user
    /// message is not written again; the answer lands in a new message.
    pub fn retry_last_turn(&self, options: TurnOptions) -> Result<TurnHandle> {
        let mut active = lock(&self.active);
        self.cancel_locked(&mut active);

        let thread = self
            .store
            .current_thread_id()
            .and_then(|id| self.store.thread(&id))
            .ok_or(ConfabError::NothingToRetry)?;
        let query = thread
            .last_user_message()
            .map(|m| m.content.clone())
            .ok_or(ConfabError::NothingToRetry)?;
        self.dispatch(&mut active, thread.id, query, options)
    }

    /// Stop the active session. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        let mut active = lock(&self.active);
        self.cancel_locked(&mut active)
    }

    /// Delete a thread, stopping its generation first.
    pub fn delete_thread(&self, thread_id: &str) -> bool {
        {
            let mut active = lock(&self.active);
            let targets_thread = active
                .as_ref()
                .is_some_and(|a| lock(&a.session).thread_id() == thread_id);
            if targets_thread {
                self.cancel_locked(&mut active);
            }
        }
        self.store.delete_thread(thread_id)
    }

    fn cancel_locked(&self, active: &mut Option<ActiveSession>) -> bool {
        let Some(previous) = active.take() else {
            return false;
        };
        let cancelled = lock(&previous.session).cancel(&self.store);
        if cancelled {
            debug!(session = previous.id, "Cancelled active session");
            self.store.flush_or_warn();
        }
        cancelled
    }

    fn dispatch(
        &self,
        active: &mut Option<ActiveSession>,
        thread_id: String,
        query: String,
        options: TurnOptions,
    ) -> Result<TurnHandle> {
        let session_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let provider_id = options
            .provider
            .clone()
            .unwrap_or_else(|| self.default_provider());
        let token = CancellationToken::new();
        let mut session =
            GenerationSession::new(session_id, &thread_id, &provider_id, token.clone());

        let descriptor = match self.resolve(&provider_id) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Refusing to dispatch to {provider_id}: {e}");
                session.fail(&self.store, user_message(&e));
                self.store.flush_or_warn();
                return Err(e);
            }
        };

        let messages = self.outgoing_history(&thread_id);
        let augmenter = match options.augment.unwrap_or(self.augment_by_default) {
            true => self.augmenter.clone(),
            false => None,
        };

        info!(
            session = session_id,
            provider = %provider_id,
            protocol = %descriptor.protocol,
            "Dispatching turn"
        );

        let session = Arc::new(Mutex::new(session));
        *active = Some(ActiveSession {
            id: session_id,
            session: session.clone(),
        });

        let task = SessionTask {
            id: session_id,
            store: self.store.clone(),
            adapter: self.adapters.for_kind(descriptor.protocol),
            descriptor,
            messages,
            augmenter,
            query,
            page_hint: options.page_hint,
            session,
            token,
            active: self.active.clone(),
        };

        Ok(TurnHandle {
            session_id,
            thread_id,
            handle: tokio::spawn(task.run()),
        })
    }

    fn resolve(&self, provider_id: &str) -> Result<ProviderDescriptor> {
        let descriptor = self.registry().get(provider_id)?.clone();
        descriptor.credential()?;
        Ok(descriptor)
    }

    /// System prompt plus the thread up to and including its latest user
    /// message. Stored content is never augmented, so retries start clean.
    fn outgoing_history(&self, thread_id: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        if let Some(thread) = self.store.thread(thread_id) {
            let end = thread
                .messages
                .iter()
                .rposition(|m| m.role == Role::User)
                .map_or(0, |i| i + 1);
            messages.extend(thread.messages[..end].iter().map(ChatMessage::to_wire));
        }
        messages
    }
}

/// Everything the spawned half of a session needs.
struct SessionTask {
    id: u64,
    store: Arc<ConversationStore>,
    adapter: Arc<dyn ProtocolAdapter>,
    descriptor: ProviderDescriptor,
    messages: Vec<Message>,
    augmenter: Option<Augmenter>,
    query: String,
    page_hint: Option<String>,
    session: Arc<Mutex<GenerationSession>>,
    token: CancellationToken,
    active: ActiveSlot,
}

impl SessionTask {
    async fn run(mut self) -> TurnOutcome {
        let messages = std::mem::take(&mut self.messages);
        let (messages, augmented) = match &self.augmenter {
            Some(augmenter) => {
                let lookup = augmenter.augment(messages, &self.query, self.page_hint.as_deref());
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return self.finish(),
                    result = lookup => (result.messages, result.applied),
                }
            }
            None => (messages, false),
        };

        let started = lock(&self.session).begin_streaming(augmented);
        if !started {
            return self.finish();
        }

        let mut sink = SessionSink {
            session: self.session.clone(),
            store: self.store.clone(),
        };
        self.adapter
            .stream(&self.descriptor, &messages, &self.token, &mut sink)
            .await;
        self.finish()
    }

    fn finish(&self) -> TurnOutcome {
        let outcome = {
            let mut session = lock(&self.session);
            if !session.phase().is_terminal() {
                if self.token.is_cancelled() {
                    session.cancel(&self.store);
                } else {
                    session.fail(&self.store, "The stream ended unexpectedly.");
                }
            }
            session.outcome().unwrap_or(TurnOutcome::Cancelled)
        };

        {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|a| a.id == self.id) {
                *active = None;
            }
        }
        self.store.flush_or_warn();
        debug!(session = self.id, ?outcome, "Session finished");
        outcome
    }
}

/// Routes adapter callbacks into the session state machine.
struct SessionSink {
    session: Arc<Mutex<GenerationSession>>,
    store: Arc<ConversationStore>,
}

impl StreamSink for SessionSink {
    fn on_chunk(&mut self, text: &str) {
        lock(&self.session).apply_chunk(&self.store, text);
    }

    fn on_complete(&mut self) {
        lock(&self.session).complete(&self.store);
    }

    fn on_error(&mut self, error: ConfabError) {
        let mut session = lock(&self.session);
        match classify(&error, session.token()) {
            Termination::Cancelled => {
                session.cancel(&self.store);
            }
            Termination::Failed(message) => {
                warn!(session = session.id(), "Generation failed: {error}");
                session.fail(&self.store, message);
            }
        }
    }
}
