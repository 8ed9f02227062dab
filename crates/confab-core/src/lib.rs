pub mod config;
pub mod constants;
pub mod context;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod session;

// Re-export key types
pub use config::Settings;
pub use context::{Augmenter, ContextProvider, HttpContextProvider};
pub use conversation::{ChatMessage, ConversationStore, StoreEvent, Thread};
pub use error::{ConfabError, Result};
pub use llm::{
    AdapterTable, Message, ProtocolAdapter, ProtocolKind, ProviderDescriptor, ProviderRegistry,
    Role, StreamSink,
};
pub use session::{GenerationController, TurnHandle, TurnOptions, TurnOutcome, TurnPhase};
