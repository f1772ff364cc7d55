use crate::types::{Message, MessageRole};

/// Ordered conversation transcript. Append-only while a run is live; the
/// simulator freezes it into the `RunResult` when the run ends.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_agent(&mut self, content: impl Into<String>) {
        self.push(Message::agent(content));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Plain-text form embedded in the judge prompt.
    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            let speaker = match message.role {
                MessageRole::User => "USER",
                MessageRole::Agent => "AGENT",
            };
            lines.push(format!("{}: {}", speaker, message.content));
        }
        lines.join("\n\n")
    }

    /// True when the transcript starts with a user message and never has two
    /// consecutive messages with the same role. An empty transcript counts.
    pub fn alternates(&self) -> bool {
        match self.messages.first() {
            None => true,
            Some(first) if first.role != MessageRole::User => false,
            Some(_) => self
                .messages
                .windows(2)
                .all(|pair| pair[0].role != pair[1].role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_labels_speakers() {
        let mut transcript = Transcript::new();
        transcript.push_user("My order is late.");
        transcript.push_agent("Let me look into that.");

        let rendered = transcript.render();
        assert!(rendered.starts_with("USER: My order is late."));
        assert!(rendered.contains("AGENT: Let me look into that."));
    }

    #[test]
    fn alternation_checks() {
        let mut transcript = Transcript::new();
        assert!(transcript.alternates());

        transcript.push_user("hi");
        transcript.push_agent("hello");
        transcript.push_user("still here");
        assert!(transcript.alternates());

        transcript.push_user("double user");
        assert!(!transcript.alternates());

        let agent_first = Transcript::with_messages(vec![Message::agent("hello?")]);
        assert!(!agent_first.alternates());
    }
}
