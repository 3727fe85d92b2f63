//! System prompt for page transcription.
//!
//! Callers can override it via [`crate::config::ConversionConfig::system_prompt`];
//! the constant here is used only when no override is provided.

/// Default system prompt sent with every page image.
///
/// The transcription is raw text in reading order: the model is told not to
/// describe the page, because a description of a table is useless to
/// anything downstream that expects the table itself.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You transcribe images of document pages into Markdown.

Rules:

1. Transcribe only the text that appears on the page, completely and in reading order.
2. Use Markdown headings, lists, **bold** and *italic* where the page shows that structure.
3. Render every table as a Markdown pipe table with a header separator row.
4. Write mathematical expressions in LaTeX: $inline$ and $$display$$.
5. Skip page numbers and running headers or footers.
6. Output ONLY the transcription. No commentary, no explanations, no ```markdown fences.
7. If the page carries no text, output nothing."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_asks_for_tables_and_no_commentary() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("pipe table"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("No commentary"));
    }
}
