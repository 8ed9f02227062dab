use crate::constants::markers::{CONTEXT_FOOTER, CONTEXT_HEADER};
use crate::context::provider::ContextProvider;
use crate::llm::{Message, Role};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outgoing history after augmentation.
#[derive(Debug, Clone)]
pub struct Augmented {
    pub messages: Vec<Message>,
    /// Whether context was actually spliced in.
    pub applied: bool,
}

/// Append `blob` to the most recent user message only. Returns false when
/// the history has no user message.
pub fn splice_context(messages: &mut [Message], blob: &str) -> bool {
    let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) else {
        return false;
    };
    last_user.content.push_str(CONTEXT_HEADER);
    last_user.content.push_str(blob);
    last_user.content.push_str(CONTEXT_FOOTER);
    true
}

/// Injects retrieved context into an outgoing history.
#[derive(Clone)]
pub struct Augmenter {
    provider: Arc<dyn ContextProvider>,
}

impl Augmenter {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self { provider }
    }

    /// Never fails: a provider error or an empty answer leaves the history
    /// untouched.
    pub async fn augment(
        &self,
        mut messages: Vec<Message>,
        query: &str,
        page_hint: Option<&str>,
    ) -> Augmented {
        let blob = match self.provider.get_context_for_query(query, page_hint).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Context lookup failed, continuing without context: {e}");
                return Augmented {
                    messages,
                    applied: false,
                };
            }
        };

        if blob.trim().is_empty() {
            debug!("Context provider returned nothing");
            return Augmented {
                messages,
                applied: false,
            };
        }

        let applied = splice_context(&mut messages, blob.trim());
        Augmented { messages, applied }
    }
}
