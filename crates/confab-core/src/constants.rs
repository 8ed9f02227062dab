/// Confab: centralized constants.
/// Endpoints, default models, markers and limits live here.

// ─── Providers ────────────────────────────────────────────────────────────────

pub mod providers {
    /// Built-in logical model ids, one per wire protocol
    pub const LLAMA3: &str = "llama3";
    pub const GEMINI_FLASH: &str = "gemini-flash";
    pub const CLAUDE_SONNET: &str = "claude-sonnet";

    pub const DEFAULT_PROVIDER: &str = LLAMA3;
}

// ─── Models ───────────────────────────────────────────────────────────────────

pub mod models {
    pub const OLLAMA_LLAMA3: &str = "llama3.1";
    pub const GEMINI_FLASH: &str = "gemini-1.5-flash";
    pub const CLAUDE_SONNET: &str = "claude-3-5-sonnet-latest";

    pub const DEFAULT_MAX_TOKENS: u32 = 4096;
}

// ─── API Endpoints ────────────────────────────────────────────────────────────

pub mod endpoints {
    pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
    pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
    pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
    pub const ANTHROPIC_VERSION: &str = "2023-06-01";
    pub const CONTEXT_BASE_URL: &str = "http://localhost:8000/api/context";

    pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
    pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
}

// ─── Conversation ─────────────────────────────────────────────────────────────

pub mod conversation {
    pub const DEFAULT_THREAD_TITLE: &str = "New Chat";
    /// Titles are the first N characters of the opening user message.
    pub const TITLE_MAX_CHARS: usize = 30;
    pub const TITLE_ELLIPSIS: &str = "...";
    pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
}

// ─── Generation markers ───────────────────────────────────────────────────────

pub mod markers {
    /// Appended to an assistant message whose generation was cancelled.
    pub const STOPPED: &str = "\n\n*[Generation stopped]*";
    /// Provenance annotations appended on completion.
    pub const WITH_CONTEXT: &str = "\n\n_Answered with retrieved context._";
    pub const WITHOUT_CONTEXT: &str = "\n\n_Answered without retrieved context._";
    /// Prefix of the assistant message written when a turn fails.
    pub const ERROR_PREFIX: &str = "Error: ";
    /// Separator between a user query and spliced context.
    pub const CONTEXT_HEADER: &str = "\n\n--- Retrieved context ---\n";
    pub const CONTEXT_FOOTER: &str = "\n--- End of context ---";
}

// ─── Stream Limits ────────────────────────────────────────────────────────────

pub mod limits {
    /// A single unterminated line longer than this aborts the stream.
    pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
}

// ─── Config Paths ─────────────────────────────────────────────────────────────

pub mod paths {
    pub const CONFIG_DIR: &str = "confab";
    pub const CONFIG_FILE: &str = "config.toml";
    pub const THREADS_FILE: &str = "threads.json";
}
