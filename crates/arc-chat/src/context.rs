//! Context window selection
//!
//! A chat history grows without bound, but only a budget-limited tail of it
//! is sent with each completion request. The system turn is kept whenever it
//! fits; dialog turns are then taken newest first until the budget runs out.

use arc_ai::Turn;
use tracing::{debug, warn};

// --- Token Estimation ---

/// Estimate the token cost of a piece of text.
///
/// Every non-ASCII character (CJK and friends) costs one token; ASCII text
/// costs a quarter token per byte, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let mut ascii = 0u32;
    let mut other = 0u32;
    for c in text.chars() {
        if c.is_ascii() {
            ascii += 1;
        } else {
            other += 1;
        }
    }
    other + ascii.div_ceil(4)
}

/// Estimate the cost of one turn
pub fn estimate_turn_tokens(turn: &Turn) -> u32 {
    estimate_tokens(&turn.content)
}

// --- Context Window ---

/// The turns selected for one completion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    /// System turn (if kept) followed by dialog turns in chronological order
    pub turns: Vec<Turn>,
    /// Estimated cost of `turns`
    pub estimated_tokens: u32,
    /// The system turn alone was larger than the budget
    pub system_dropped: bool,
    /// The newest dialog turn was included despite exceeding the budget
    pub oversized_latest: bool,
}

impl ContextWindow {
    /// Number of turns in the window
    pub fn included(&self) -> usize {
        self.turns.len()
    }
}

/// Select the part of `history` that fits in `budget` estimated tokens.
///
/// The newest dialog turn is always included, so the window may exceed the
/// budget by at most that one turn.
pub fn build_context(history: &[Turn], budget: u32) -> ContextWindow {
    let (system, dialog) = match history.split_first() {
        Some((first, rest)) if first.is_system() => (Some(first), rest),
        _ => (None, history),
    };

    let mut used = 0u32;
    let mut system_dropped = false;
    let mut kept_system = None;

    if let Some(system) = system {
        let cost = estimate_turn_tokens(system);
        if cost <= budget {
            used = cost;
            kept_system = Some(system.clone());
        } else {
            system_dropped = true;
            warn!(
                system_tokens = cost,
                budget, "System prompt exceeds the context budget, sending without it"
            );
        }
    }

    let mut accepted: Vec<&Turn> = Vec::new();
    let mut oversized_latest = false;

    for turn in dialog.iter().rev() {
        let cost = estimate_turn_tokens(turn);
        let next = used.saturating_add(cost);
        if next > budget {
            if !accepted.is_empty() {
                break;
            }
            oversized_latest = true;
            warn!(
                turn_tokens = cost,
                remaining = budget.saturating_sub(used),
                "Newest message exceeds the context budget, sending it anyway"
            );
        }
        used = next;
        accepted.push(turn);
    }

    let mut turns = Vec::with_capacity(accepted.len() + 1);
    turns.extend(kept_system);
    turns.extend(accepted.into_iter().rev().cloned());

    debug!(
        included = turns.len(),
        estimated_tokens = used,
        budget,
        history_len = history.len(),
        "Built context window"
    );

    ContextWindow {
        turns,
        estimated_tokens: used,
        system_dropped,
        oversized_latest,
    }
}
