//! Single-assignment value slots.

use crate::value::Value;
use tokio::sync::watch;

/// The state of a data node slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    /// Not written yet.
    Empty,
    /// Written exactly once.
    Filled(Value),
    /// The producer was skipped; the slot will never be written.
    Unreachable(String),
}

impl SlotState {
    /// Returns true if the slot reached a final state.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

/// A write-once cell that any number of readers can await.
#[derive(Debug)]
pub struct Slot {
    state: watch::Sender<SlotState>,
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

impl Slot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(SlotState::Empty);
        Self { state }
    }

    /// Writes the slot. Returns false if it was already resolved.
    pub fn fill(&self, value: Value) -> bool {
        self.resolve(SlotState::Filled(value))
    }

    /// Marks the slot unreachable. Returns false if it was already resolved.
    pub fn mark_unreachable(&self, reason: impl Into<String>) -> bool {
        self.resolve(SlotState::Unreachable(reason.into()))
    }

    fn resolve(&self, next: SlotState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_resolved() {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    /// Returns the current state without waiting.
    #[must_use]
    pub fn peek(&self) -> SlotState {
        self.state.borrow().clone()
    }

    /// Waits until the slot is resolved and returns its final state.
    pub async fn resolved(&self) -> SlotState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(SlotState::is_resolved).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => SlotState::Empty,
        };
        state
    }
}
