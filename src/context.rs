//! Bounded rolling window of prior exchanges, owned by one session.

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::types::{ChatOutput, Prompt};

/// One completed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub user: Prompt,
    pub bot: ChatOutput,
}

/// Insertion-ordered history of exchanges.
///
/// The maximum length is passed on every call rather than stored, so a session
/// that shrinks its limit trims older entries on the next [`ContextBuffer::record`].
#[derive(Debug, Clone, Default)]
pub struct ContextBuffer {
    entries: VecDeque<ContextEntry>,
}

impl ContextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes prior exchanges onto a plain-text prompt.
    ///
    /// Returns `prompt` unchanged when the window is disabled (`max_len == 0`),
    /// when the prompt is a structured message list, or when nothing has been
    /// recorded yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::context::ContextBuffer;
    /// use llm_relay::types::{ChatOutput, Prompt};
    ///
    /// let mut buffer = ContextBuffer::new();
    /// buffer.record("Hi".into(), ChatOutput::Text("Hello!".into()), 5);
    ///
    /// let prompt = buffer.add_context("How are you?".into(), 5);
    /// assert_eq!(
    ///     prompt,
    ///     Prompt::Text("User: Hi\nBot: Hello!\nUser: How are you?\nBot:".into())
    /// );
    /// ```
    pub fn add_context(&self, prompt: Prompt, max_len: usize) -> Prompt {
        let text = match &prompt {
            Prompt::Text(text) if max_len > 0 && !self.entries.is_empty() => text,
            _ => return prompt,
        };

        let mut combined = String::new();
        for entry in &self.entries {
            // Writing into a String cannot fail.
            let _ = write!(combined, "User: {}\nBot: {}\n", entry.user, entry.bot);
        }
        let _ = write!(combined, "User: {text}\nBot:");
        Prompt::Text(combined)
    }

    /// Appends an exchange, then drops the oldest entries beyond `max_len`.
    pub fn record(&mut self, user: Prompt, bot: ChatOutput, max_len: usize) {
        self.entries.push_back(ContextEntry { user, bot });
        while self.entries.len() > max_len {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from oldest to newest.
    pub fn entries(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ContextEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn text(value: &str) -> ChatOutput {
        ChatOutput::Text(value.to_string())
    }

    #[test]
    fn buffer_keeps_most_recent_entries_in_order() {
        let mut buffer = ContextBuffer::new();
        let max_len = 3;
        for idx in 0..(max_len + 4) {
            buffer.record(
                Prompt::Text(format!("q{idx}")),
                text(&format!("a{idx}")),
                max_len,
            );
            assert!(buffer.len() <= max_len);
        }

        let users: Vec<String> = buffer.entries().map(|e| e.user.to_string()).collect();
        assert_eq!(users, vec!["q4", "q5", "q6"]);
    }

    #[test]
    fn add_context_is_identity_when_disabled_empty_or_structured() {
        let mut buffer = ContextBuffer::new();
        let prompt = Prompt::from("New message");
        assert_eq!(buffer.add_context(prompt.clone(), 5), prompt);

        buffer.record("Hi".into(), text("Hello"), 5);
        assert_eq!(buffer.add_context(prompt.clone(), 0), prompt);

        let structured = Prompt::from(vec![Message::user("Test")]);
        assert_eq!(buffer.add_context(structured.clone(), 5), structured);
    }

    #[test]
    fn add_context_formats_alternating_turns() {
        let mut buffer = ContextBuffer::new();
        buffer.record("Hi".into(), text("Hello"), 5);
        buffer.record("Weather?".into(), text("Sunny"), 5);

        let prompt = buffer.add_context("Thanks".into(), 5);
        assert_eq!(
            prompt.as_text(),
            Some("User: Hi\nBot: Hello\nUser: Weather?\nBot: Sunny\nUser: Thanks\nBot:")
        );
    }

    #[test]
    fn shrinking_limit_trims_lazily_on_next_record() {
        let mut buffer = ContextBuffer::new();
        for word in ["Hi", "Hey", "Yo"] {
            buffer.record(word.into(), text("ok"), 5);
        }
        assert_eq!(buffer.len(), 3);

        buffer.record("Bye".into(), text("ok"), 2);
        let users: Vec<String> = buffer.entries().map(|e| e.user.to_string()).collect();
        assert_eq!(users, vec!["Yo", "Bye"]);
    }

    #[test]
    fn zero_limit_records_nothing() {
        let mut buffer = ContextBuffer::new();
        buffer.record("Hi".into(), text("ok"), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buffer = ContextBuffer::new();
        buffer.record("Hi".into(), text("ok"), 5);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
