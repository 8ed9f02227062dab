// Library interface for confab-cli
// This allows integration tests to access internal modules

// NOTE: Since commands.rs and view.rs are also declared in main.rs,
// we need to use a path attribute to reference the same source file
// to avoid "file loaded multiple times" errors.

#[path = "commands.rs"]
pub mod commands;

#[path = "view.rs"]
pub mod view;

// Re-export commonly used items for easier testing
pub use commands::{handle_command, CommandResult};
pub use view::Renderer;
