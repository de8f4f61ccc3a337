//! Conversation-related types.

use std::collections::VecDeque;

use storm_agent_model::ModelMessage;

/// The text of the synthetic turn that replaces evicted history.
pub const TRUNCATION_NOTICE: &str = "[Earlier history has been truncated.]";

/// The default token budget of a conversation.
pub const DEFAULT_TOKEN_BUDGET: usize = 180_000;

const CHARS_PER_TOKEN: usize = 4;
const TURN_OVERHEAD: usize = 4;

/// The role of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Input from the user.
    User,
    /// A message generated by the model.
    Assistant,
    /// The result of a tool call.
    ToolResult,
}

/// An entry in the conversation.
///
/// Turns can't be modified once they have been appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    message: ModelMessage,
    tokens: usize,
    notice: bool,
}

impl Turn {
    fn new(message: ModelMessage) -> Self {
        let tokens = estimate_tokens(&message);
        Self {
            message,
            tokens,
            notice: false,
        }
    }

    fn truncation_notice() -> Self {
        Self {
            notice: true,
            ..Self::new(ModelMessage::user(TRUNCATION_NOTICE))
        }
    }

    /// Returns the role of this turn.
    #[inline]
    pub fn role(&self) -> Role {
        match &self.message {
            ModelMessage::User { .. } => Role::User,
            ModelMessage::Assistant(_) => Role::Assistant,
            ModelMessage::Tool(_) => Role::ToolResult,
        }
    }

    /// Returns the message of this turn.
    #[inline]
    pub fn message(&self) -> &ModelMessage {
        &self.message
    }

    /// Returns the estimated token cost of this turn.
    #[inline]
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Returns `true` if this turn stands in for evicted history.
    #[inline]
    pub fn is_truncation_notice(&self) -> bool {
        self.notice
    }

    #[inline]
    fn starts_exchange(&self) -> bool {
        self.role() == Role::User && !self.notice
    }
}

/// An ordered transcript with a bounded token budget.
///
/// After every append, the oldest turns are evicted until the estimated
/// cost fits the budget again. An assistant turn is always evicted
/// together with the tool results that answer it, and the most recent
/// exchange (from the last user input to the end) is never evicted. If
/// that exchange alone exceeds the budget, it's kept anyway and
/// [`Conversation::is_over_budget`] reports it.
///
/// Once anything has been evicted, the transcript starts with a user turn
/// saying so ([`TRUNCATION_NOTICE`]).
#[derive(Clone, Debug)]
pub struct Conversation {
    system: Option<String>,
    system_tokens: usize,
    turns: VecDeque<Turn>,
    turn_tokens: usize,
    budget: usize,
}

impl Default for Conversation {
    #[inline]
    fn default() -> Self {
        Self::with_budget(DEFAULT_TOKEN_BUDGET)
    }
}

impl Conversation {
    /// Creates an empty conversation with the given token budget.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            system: None,
            system_tokens: 0,
            turns: VecDeque::new(),
            turn_tokens: 0,
            budget,
        }
    }

    /// Sets the system prompt. It counts toward the budget but is never
    /// evicted.
    pub fn set_system_prompt<S: Into<String>>(&mut self, prompt: Option<S>) {
        self.system = prompt.map(Into::into);
        self.system_tokens = self
            .system
            .as_deref()
            .map_or(0, |s| estimate_text_tokens(s) + TURN_OVERHEAD);
        self.enforce_budget();
    }

    /// Returns the system prompt.
    #[inline]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Appends a turn and evicts old turns if the budget is exceeded.
    pub fn push(&mut self, message: ModelMessage) {
        let turn = Turn::new(message);
        self.turn_tokens += turn.tokens;
        self.turns.push_back(turn);
        self.enforce_budget();
    }

    /// Returns the turns, oldest first.
    #[inline]
    pub fn turns(&self) -> &VecDeque<Turn> {
        &self.turns
    }

    /// Returns the number of turns.
    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if there are no turns.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns the estimated token cost, system prompt included.
    #[inline]
    pub fn estimated_tokens(&self) -> usize {
        self.system_tokens + self.turn_tokens
    }

    /// Returns the token budget.
    #[inline]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Returns `true` if the turns that can't be evicted exceed the budget.
    #[inline]
    pub fn is_over_budget(&self) -> bool {
        self.estimated_tokens() > self.budget
    }

    /// Removes all turns. The system prompt is kept.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.turn_tokens = 0;
    }

    /// Returns the messages to send to the model, oldest first.
    pub fn to_messages(&self) -> Vec<ModelMessage> {
        self.turns.iter().map(|t| t.message.clone()).collect()
    }

    fn has_notice(&self) -> bool {
        self.turns.front().is_some_and(|t| t.notice)
    }

    /// Index of the first turn of the most recent exchange.
    fn protected_from(&self) -> usize {
        self.turns
            .iter()
            .rposition(Turn::starts_exchange)
            .or_else(|| {
                self.turns.iter().rposition(|t| t.role() == Role::Assistant)
            })
            .unwrap_or(0)
    }

    fn enforce_budget(&mut self) {
        let mut evicted = 0;
        while self.is_over_budget() && self.evict_oldest_group() {
            evicted += 1;
        }
        if evicted > 0 {
            debug!(
                "evicted {evicted} turn group(s), {} tokens left",
                self.estimated_tokens()
            );
        }

        // The notice may be the last straw. Drop it if what remains starts
        // with a user turn anyway.
        if self.is_over_budget()
            && self.has_notice()
            && self.turns.get(1).is_some_and(Turn::starts_exchange)
        {
            if let Some(notice) = self.turns.pop_front() {
                self.turn_tokens -= notice.tokens;
            }
        }

        if self.is_over_budget() {
            warn!(
                "the most recent exchange alone exceeds the token budget \
                 ({} > {})",
                self.estimated_tokens(),
                self.budget
            );
        }
    }

    fn evict_oldest_group(&mut self) -> bool {
        let had_notice = self.has_notice();
        let start = usize::from(had_notice);
        let protected = self.protected_from();
        if start >= protected {
            return false;
        }

        let mut end = start + 1;
        while end < protected && self.turns[end].role() == Role::ToolResult {
            end += 1;
        }
        for turn in self.turns.drain(start..end) {
            self.turn_tokens -= turn.tokens;
        }

        if !had_notice {
            let notice = Turn::truncation_notice();
            self.turn_tokens += notice.tokens;
            self.turns.push_front(notice);
        }
        true
    }
}

/// Estimates the token cost of a message.
///
/// This is a character heuristic, not the model's own tokenizer, so the
/// result is only roughly proportional to what the provider will report.
pub fn estimate_tokens(message: &ModelMessage) -> usize {
    let text_tokens = match message {
        ModelMessage::User { content } => estimate_text_tokens(content),
        ModelMessage::Assistant(msg) => {
            estimate_text_tokens(&msg.content)
                + msg
                    .tool_calls
                    .iter()
                    .map(|call| {
                        estimate_text_tokens(&call.name)
                            + estimate_text_tokens(&call.arguments.to_string())
                    })
                    .sum::<usize>()
        }
        ModelMessage::Tool(result) => estimate_text_tokens(&result.content),
    };
    text_tokens + TURN_OVERHEAD
}

#[inline]
fn estimate_text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}
