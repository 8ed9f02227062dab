/// Result of processing a slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Display a message to the user.
    Message(String),
    /// Quit the application.
    Quit,
    /// Stop the running generation.
    Stop,
    /// Re-run the last user message.
    Retry,
    /// Start a fresh thread.
    NewThread,
    /// List threads, most recent first.
    ListThreads,
    /// Select a thread by id or id prefix.
    SwitchThread(String),
    /// Rename the current thread.
    RenameThread(String),
    /// Delete the current thread.
    DeleteThread,
    /// Show the default provider.
    ShowProvider,
    /// Change the default provider.
    ProviderChanged(String),
    /// List configured providers.
    ListProviders,
    /// Not a command - treat as regular input.
    NotACommand,
}

pub fn handle_command(input: &str) -> CommandResult {
    let input = input.trim();
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd {
        "/help" | "/h" => show_help(),
        "/exit" | "/quit" | "/q" => CommandResult::Quit,
        "/stop" => CommandResult::Stop,
        "/retry" => CommandResult::Retry,

        // Threads
        "/new" => CommandResult::NewThread,
        "/threads" | "/history" => CommandResult::ListThreads,
        "/switch" => {
            if arg.is_empty() {
                CommandResult::Message("Usage: /switch <thread-id>".into())
            } else {
                CommandResult::SwitchThread(arg.to_string())
            }
        }
        "/rename" => {
            if arg.is_empty() {
                CommandResult::Message("Usage: /rename <title>".into())
            } else {
                CommandResult::RenameThread(arg.to_string())
            }
        }
        "/delete" => CommandResult::DeleteThread,

        // Providers
        "/provider" => {
            if arg.is_empty() {
                CommandResult::ShowProvider
            } else {
                CommandResult::ProviderChanged(arg.to_string())
            }
        }
        "/providers" => CommandResult::ListProviders,

        "/version" => CommandResult::Message(format!("Confab v{}", env!("CARGO_PKG_VERSION"))),

        _ => {
            if input.starts_with('/') {
                CommandResult::Message(format!("Unknown command: {cmd}. Type /help for commands."))
            } else {
                CommandResult::NotACommand
            }
        }
    }
}

fn show_help() -> CommandResult {
    let help_text = "\
Confab commands

  GENERATION
    /stop                     Stop the running answer
    /retry                    Ask the last question again

  THREADS
    /new                      Start a fresh thread
    /threads, /history        List threads
    /switch <id>              Switch to a thread (id prefix is enough)
    /rename <title>           Rename the current thread
    /delete                   Delete the current thread

  PROVIDERS
    /provider [id]            Show or change the provider
    /providers                List configured providers

  OTHER
    /help, /h                 Show this help message
    /version                  Show version information
    /exit, /quit, /q          Quit

Anything else is sent as a message. Sending while an answer is streaming
stops that answer first.";

    CommandResult::Message(help_text.into())
}
