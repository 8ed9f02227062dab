use crate::constants::conversation::{DEFAULT_THREAD_TITLE, TITLE_ELLIPSIS, TITLE_MAX_CHARS};

/// Derives a thread title from its opening user message.
pub trait TitleGenerator: Send + Sync {
    fn generate(&self, first_message: &str) -> String;
}

/// First [`TITLE_MAX_CHARS`] characters, with an ellipsis when cut.
///
/// Counts `char`s, so a grapheme built from several code points can still be
/// split at the boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncatingTitleGenerator;

impl TitleGenerator for TruncatingTitleGenerator {
    fn generate(&self, first_message: &str) -> String {
        truncate_title(first_message, TITLE_MAX_CHARS)
    }
}

pub fn truncate_title(text: &str, max_chars: usize) -> String {
    if text.trim().is_empty() {
        return DEFAULT_THREAD_TITLE.to_string();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}{TITLE_ELLIPSIS}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_title_unmodified() {
        assert_eq!(TruncatingTitleGenerator.generate("Hello"), "Hello");
    }

    #[test]
    fn test_exactly_thirty_chars_unmodified() {
        let text = "a".repeat(30);
        assert_eq!(truncate_title(&text, 30), text);
    }

    #[test]
    fn test_long_title_cut_with_ellipsis() {
        let title = truncate_title("How do I configure a reverse proxy for websockets?", 30);
        assert_eq!(title, "How do I configure a reverse p...");
        assert_eq!(title.chars().count(), 33);
    }

    #[test]
    fn test_multibyte_text_cut_on_char_boundary() {
        let text = "日本語のテキストはとても長いのでタイトルとして切り詰められるべきです";
        let title = truncate_title(text, 30);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 33);
    }

    #[test]
    fn test_blank_falls_back_to_default() {
        assert_eq!(truncate_title("   ", 30), DEFAULT_THREAD_TITLE);
    }
}
