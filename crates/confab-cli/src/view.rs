use confab_core::{ProviderDescriptor, Role, StoreEvent, Thread};
use std::collections::HashMap;

/// Turns store events into terminal output.
///
/// Assistant messages are re-upserted with their full text on every chunk,
/// so the renderer remembers how much of each message it already printed
/// and emits only the new suffix.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: HashMap<String, usize>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for `event`, if any.
    pub fn render(&mut self, event: &StoreEvent) -> Option<String> {
        let StoreEvent::MessageUpserted { message, .. } = event else {
            return None;
        };
        if message.role != Role::Assistant {
            return None;
        }

        let printed = self.printed.entry(message.id.clone()).or_insert(0);
        let output = match message.content.get(*printed..) {
            Some(suffix) => suffix.to_string(),
            // Rewritten rather than extended: start over on a fresh line.
            None => format!("\n{}", message.content),
        };
        *printed = message.content.len();
        (!output.is_empty()).then_some(output)
    }
}

/// Short form of a thread id for listings.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn format_threads(threads: &[Thread], current: Option<&str>) -> String {
    if threads.is_empty() {
        return "No threads yet.".to_string();
    }
    threads
        .iter()
        .map(|thread| {
            let marker = if Some(thread.id.as_str()) == current { "*" } else { " " };
            format!(
                "{marker} {}  {}  ({} messages, {})",
                short_id(&thread.id),
                thread.title,
                thread.messages.len(),
                thread.updated_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_providers(providers: &[ProviderDescriptor], default_provider: &str) -> String {
    providers
        .iter()
        .map(|p| {
            let marker = if p.id == default_provider { "*" } else { " " };
            format!("{marker} {:<16} {:<13} {}", p.id, p.protocol.to_string(), p.model)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find the one thread whose id starts with `prefix`.
pub fn resolve_thread(threads: &[Thread], prefix: &str) -> Result<String, String> {
    let matches: Vec<&Thread> = threads.iter().filter(|t| t.id.starts_with(prefix)).collect();
    match matches.as_slice() {
        [thread] => Ok(thread.id.clone()),
        [] => Err(format!("No thread matches '{prefix}'.")),
        _ => Err(format!(
            "'{prefix}' matches {} threads; use more characters.",
            matches.len()
        )),
    }
}
