//! Conversation history with a character budget
//!
//! Turns are kept in order. When the budget is exceeded the oldest turns
//! are evicted until the remainder fits, so what is kept is always the most
//! recent contiguous run of turns.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default total character budget
pub const DEFAULT_HISTORY_BUDGET: usize = 20_000;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One recorded turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }

    /// Size counted against the budget
    #[must_use]
    pub fn chars(&self) -> usize {
        self.text.chars().count()
    }
}

/// Ordered turns capped by a total character budget
#[derive(Debug, Clone)]
pub struct HistoryStore {
    turns: VecDeque<Turn>,
    budget: usize,
    total_chars: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_BUDGET)
    }
}

impl HistoryStore {
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            budget,
            total_chars: 0,
        }
    }

    /// Append a turn, evicting the oldest turns if over budget
    pub fn push(&mut self, turn: Turn) {
        self.total_chars += turn.chars();
        self.turns.push_back(turn);
        self.prune();
    }

    /// Record a completed user/model exchange
    pub fn append_exchange(&mut self, query: &str, reply: &str) {
        self.push(Turn::user(query));
        self.push(Turn::model(reply));
    }

    fn prune(&mut self) {
        let mut evicted = 0;
        while self.total_chars > self.budget {
            let Some(oldest) = self.turns.pop_front() else {
                break;
            };
            self.total_chars -= oldest.chars();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(
                evicted,
                retained = self.turns.len(),
                total_chars = self.total_chars,
                "history pruned"
            );
        }
    }

    /// Retained turns, oldest first
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Copy of the retained turns, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// Total characters retained
    #[must_use]
    pub const fn total_chars(&self) -> usize {
        self.total_chars
    }

    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.total_chars = 0;
    }
}
