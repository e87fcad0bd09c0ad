use chrono::{DateTime, Utc};
use parley_common::{Message, ProviderId, Role, SessionId};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// A change to one conversation history, for persistence or display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Appended { message: Message },
    Summarized { summary: String },
    RolledBack { removed: usize },
    Cleared,
    Loaded { messages: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub session_id: SessionId,
    pub provider_id: ProviderId,
    pub at: DateTime<Utc>,
    pub event: HistoryEvent,
}

/// Where a history reports its changes. Sends never block and a closed
/// receiver is ignored.
#[derive(Debug, Clone)]
pub struct HistorySink {
    session_id: SessionId,
    provider_id: ProviderId,
    tx: UnboundedSender<HistoryRecord>,
}

impl HistorySink {
    pub fn new(
        session_id: SessionId,
        provider_id: ProviderId,
        tx: UnboundedSender<HistoryRecord>,
    ) -> Self {
        Self {
            session_id,
            provider_id,
            tx,
        }
    }

    fn emit(&self, event: HistoryEvent) {
        let record = HistoryRecord {
            session_id: self.session_id.clone(),
            provider_id: self.provider_id.clone(),
            at: Utc::now(),
            event,
        };
        if self.tx.send(record).is_err() {
            debug!(session = %self.session_id, "history sink closed");
        }
    }
}

/// Ordered messages for one (session, provider) pair.
///
/// At most one summary exists at a time, always at the front, stored as a
/// system message.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    summarize_threshold: usize,
    has_summary: bool,
    sink: Option<HistorySink>,
}

impl ConversationHistory {
    pub fn new(summarize_threshold: usize) -> Self {
        Self {
            messages: Vec::new(),
            summarize_threshold,
            has_summary: false,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: HistorySink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_summarize_threshold(&mut self, threshold: usize) {
        self.summarize_threshold = threshold;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_summary(&self) -> bool {
        self.has_summary
    }

    /// Messages excluding the leading summary.
    pub fn non_summary_count(&self) -> usize {
        self.messages.len() - usize::from(self.has_summary)
    }

    /// User and assistant turns, ignoring the summary and tool plumbing. An
    /// assistant message that only requests tools is plumbing too.
    pub fn dialogue_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| match m.role() {
                Role::User => true,
                Role::Assistant => m.tool_calls().is_empty(),
                _ => false,
            })
            .count()
    }

    /// A threshold of 0 disables summarization.
    pub fn should_summarize(&self) -> bool {
        self.summarize_threshold > 0 && self.non_summary_count() > self.summarize_threshold
    }

    /// The messages a summary should cover: everything except a trailing user
    /// turn that has not been answered yet.
    pub fn summarizable(&self) -> &[Message] {
        match self.messages.last() {
            Some(last) if last.role() == Role::User => &self.messages[..self.messages.len() - 1],
            _ => &self.messages,
        }
    }

    pub fn append(&mut self, message: Message) {
        if let Some(sink) = &self.sink {
            sink.emit(HistoryEvent::Appended {
                message: message.clone(),
            });
        }
        self.messages.push(message);
    }

    /// Collapse the history into a single summary message, keeping a pending
    /// user turn after it.
    pub fn replace_with_summary(&mut self, summary: impl Into<String>) {
        let summary = summary.into();
        let pending = match self.messages.last() {
            Some(last) if last.role() == Role::User => self.messages.pop(),
            _ => None,
        };

        self.messages.clear();
        self.messages.push(Message::system(summary.clone()));
        self.messages.extend(pending);
        self.has_summary = true;

        if let Some(sink) = &self.sink {
            sink.emit(HistoryEvent::Summarized { summary });
        }
    }

    /// Drop everything from `len` on. Used to undo a failed turn.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.messages.len() {
            return;
        }
        let removed = self.messages.len() - len;
        self.messages.truncate(len);
        if len == 0 {
            self.has_summary = false;
        }
        if let Some(sink) = &self.sink {
            sink.emit(HistoryEvent::RolledBack { removed });
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.has_summary = false;
        if let Some(sink) = &self.sink {
            sink.emit(HistoryEvent::Cleared);
        }
    }

    /// Replace the history wholesale, e.g. from a persisted transcript.
    /// A leading system message is treated as the summary.
    pub fn load(&mut self, messages: Vec<Message>) {
        self.has_summary = messages.first().is_some_and(|m| m.role() == Role::System);
        self.messages = messages;
        if let Some(sink) = &self.sink {
            sink.emit(HistoryEvent::Loaded {
                messages: self.messages.len(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn filled(turns: usize) -> ConversationHistory {
        let mut history = ConversationHistory::new(10);
        for i in 0..turns {
            history.append(Message::user(format!("q{i}")));
            history.append(Message::assistant(format!("a{i}")));
        }
        history
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut history = filled(5);
        assert_eq!(history.non_summary_count(), 10);
        assert!(!history.should_summarize());

        history.append(Message::user("one more"));
        assert!(history.should_summarize());
    }

    #[test]
    fn zero_threshold_never_summarizes() {
        let mut history = filled(20);
        history.set_summarize_threshold(0);
        assert!(!history.should_summarize());
    }

    #[test]
    fn summary_keeps_pending_user_turn() {
        let mut history = filled(5);
        history.append(Message::user("latest"));
        assert_eq!(history.summarizable().len(), 10);

        history.replace_with_summary("they talked about rates");

        assert_eq!(history.len(), 2);
        assert!(history.has_summary());
        assert_eq!(history.messages()[0].role(), Role::System);
        assert_eq!(history.messages()[1].content(), "latest");
        assert_eq!(history.non_summary_count(), 1);
    }

    #[test]
    fn second_summary_replaces_the_first() {
        let mut history = filled(6);
        history.replace_with_summary("first");
        for i in 0..6 {
            history.append(Message::user(format!("more{i}")));
            history.append(Message::assistant("ok"));
        }
        history.replace_with_summary("second");

        let summaries = history
            .messages()
            .iter()
            .filter(|m| m.role() == Role::System)
            .count();
        assert_eq!(summaries, 1);
        assert_eq!(history.messages()[0].content(), "second");
    }

    #[test]
    fn dialogue_count_skips_tool_requests() {
        let mut history = ConversationHistory::new(0);
        history.load(vec![Message::system("earlier")]);
        history.append(Message::user("USD?"));
        history.append(Message::assistant_with_tool_calls(
            "",
            vec![parley_common::ToolCallRequest {
                id: "call_1".to_string(),
                tool_name: "get_rate".to_string(),
                raw_arguments: "{}".to_string(),
            }],
        ));
        history.append(Message::tool("call_1", "95.50"));
        history.append(Message::assistant("95.50 RUB"));

        assert_eq!(history.len(), 5);
        assert_eq!(history.dialogue_count(), 2);
    }

    #[test]
    fn truncate_rolls_back() {
        let mut history = filled(2);
        history.append(Message::user("failed turn"));
        history.truncate(4);
        assert_eq!(history.len(), 4);
        history.truncate(10);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn load_detects_summary() {
        let mut history = ConversationHistory::new(10);
        history.load(vec![Message::system("earlier"), Message::user("hi")]);
        assert!(history.has_summary());
        assert_eq!(history.non_summary_count(), 1);

        history.clear();
        assert!(history.is_empty());
        assert!(!history.has_summary());
    }

    #[test]
    fn events_reach_the_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut history = ConversationHistory::new(10).with_sink(HistorySink::new(
            SessionId::from("s1"),
            ProviderId::from("ollama"),
            tx,
        ));

        history.append(Message::user("hi"));
        history.truncate(0);
        history.clear();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.session_id.as_str(), "s1");
        assert!(matches!(first.event, HistoryEvent::Appended { .. }));
        assert_eq!(
            rx.try_recv().unwrap().event,
            HistoryEvent::RolledBack { removed: 1 }
        );
        assert_eq!(rx.try_recv().unwrap().event, HistoryEvent::Cleared);
    }

    #[test]
    fn closed_sink_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut history = ConversationHistory::new(10).with_sink(HistorySink::new(
            SessionId::new(),
            ProviderId::from("ollama"),
            tx,
        ));
        history.append(Message::user("hi"));
        assert_eq!(history.len(), 1);
    }
}
