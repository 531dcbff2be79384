//! Token-budgeted context window construction.
//!
//! Given the full candidate history of a session, [`build_window`] selects the
//! subset actually sent to the model: every pinned message first, then the
//! highest-importance remainder that still fits the budget.  Selection never
//! reorders messages relative to the input and never edits their contents.
//!
//! Pinning protects the messages a conversation cannot lose: all system
//! messages, the first user message, and the most recent
//! [`MIN_RECENT_MESSAGES`] messages.

use crate::agenthive::client::{estimate_message_tokens, ChatMessage, Role};
use std::fmt;

/// The most recent messages that are always pinned into the window.
pub const MIN_RECENT_MESSAGES: usize = 4;

/// Raised when not even one pinned message fits the budget.
#[derive(Debug, Clone)]
pub struct ContextError {
    /// The budget that could not accommodate any pinned message.
    pub budget: usize,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pinned messages exceed the context budget of {} tokens",
            self.budget
        )
    }
}

impl std::error::Error for ContextError {}

struct Candidate {
    index: usize,
    tokens: usize,
    importance: u32,
    pinned: bool,
}

fn importance_of(message: &ChatMessage, index: usize, total: usize) -> u32 {
    let mut score: u32 = match message.role {
        Role::System => 100,
        Role::Tool { .. } => 80,
        Role::User => 60,
        Role::Assistant => 40,
    };
    if !message.tool_calls.is_empty() || matches!(message.role, Role::Tool { .. }) {
        score += 20;
    }
    if message.content.len() > 200 {
        score += 10;
    }
    // Last quartile of the history counts as recent.
    if total > 0 && index * 4 >= total * 3 {
        score += 15;
    }
    score
}

/// Build the message window sent to the model.
///
/// `max_tokens` is the model's input allowance and `reserve_tokens` is held
/// back for the model's own output; the usable budget is the difference.
/// Returns the selected messages in their original order.
///
/// # Example
///
/// ```rust
/// use agenthive::client::ChatMessage;
/// use agenthive::context::build_window;
///
/// let history = vec![
///     ChatMessage::system("You are helpful."),
///     ChatMessage::user("Hello"),
///     ChatMessage::assistant("Hi there."),
/// ];
/// let window = build_window(&history, 4096, 1024).unwrap();
/// assert_eq!(window.len(), 3);
/// ```
pub fn build_window(
    messages: &[ChatMessage],
    max_tokens: usize,
    reserve_tokens: usize,
) -> Result<Vec<ChatMessage>, ContextError> {
    let budget = max_tokens.saturating_sub(reserve_tokens);
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let total = messages.len();
    let first_user = messages
        .iter()
        .position(|m| matches!(m.role, Role::User));
    let recent_floor = total.saturating_sub(MIN_RECENT_MESSAGES);

    let candidates: Vec<Candidate> = messages
        .iter()
        .enumerate()
        .map(|(index, message)| Candidate {
            index,
            tokens: estimate_message_tokens(message),
            importance: importance_of(message, index, total),
            pinned: matches!(message.role, Role::System)
                || Some(index) == first_user
                || index >= recent_floor,
        })
        .collect();

    let pinned_total: usize = candidates
        .iter()
        .filter(|c| c.pinned)
        .map(|c| c.tokens)
        .sum();

    let mut selected: Vec<usize> = Vec::new();

    if pinned_total > budget {
        // Over budget on pins alone: keep pinned messages in chronological
        // order until the budget runs out.
        let mut used = 0usize;
        for candidate in candidates.iter().filter(|c| c.pinned) {
            if used + candidate.tokens > budget {
                break;
            }
            used += candidate.tokens;
            selected.push(candidate.index);
        }
        if selected.is_empty() {
            return Err(ContextError { budget });
        }
    } else {
        let mut used = pinned_total;
        selected.extend(candidates.iter().filter(|c| c.pinned).map(|c| c.index));

        // Greedy fill by descending importance; ties prefer the more recent
        // (higher index) message.
        let mut rest: Vec<&Candidate> = candidates.iter().filter(|c| !c.pinned).collect();
        rest.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then(b.index.cmp(&a.index))
        });
        for candidate in rest {
            if used + candidate.tokens > budget {
                continue;
            }
            used += candidate.tokens;
            selected.push(candidate.index);
        }

        if selected.is_empty() {
            return Err(ContextError { budget });
        }
    }

    selected.sort_unstable();
    Ok(selected
        .into_iter()
        .map(|index| messages[index].clone())
        .collect())
}
