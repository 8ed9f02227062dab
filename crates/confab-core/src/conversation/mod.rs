mod types;
mod store;
pub mod title;
pub mod persistence;

pub use types::{generate_id, ChatMessage, Thread};
pub use store::{ConversationStore, StoreEvent};
pub use title::{TitleGenerator, TruncatingTitleGenerator};
pub use persistence::{PersistedState, ThreadPersistence};
