//! Bounded, priority-ordered admission for module executions.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

struct Waiter {
    priority: i32,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct GateState {
    available: usize,
    waiters: BinaryHeap<Waiter>,
    seq: u64,
}

/// Limits how many module executions of one run proceed at once.
///
/// When the gate is full, waiters are admitted by descending priority and
/// in arrival order among equal priorities.
pub(crate) struct PriorityGate {
    capacity: usize,
    state: Mutex<GateState>,
}

impl fmt::Debug for PriorityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PriorityGate")
            .field("capacity", &self.capacity)
            .field("available", &state.available)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

impl PriorityGate {
    /// Creates a gate admitting up to `capacity` holders. Zero is treated as one.
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            capacity,
            state: Mutex::new(GateState {
                available: capacity,
                waiters: BinaryHeap::new(),
                seq: 0,
            }),
        })
    }

    /// Returns the configured capacity.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of free slots.
    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Waits for a slot.
    pub async fn acquire(self: &Arc<Self>, priority: i32) -> GateSlot {
        loop {
            let rx = {
                let mut state = self.state.lock();
                if state.available > 0 {
                    state.available -= 1;
                    return GateSlot {
                        gate: Arc::clone(self),
                    };
                }
                let (tx, rx) = oneshot::channel();
                let seq = state.seq;
                state.seq += 1;
                state.waiters.push(Waiter { priority, seq, tx });
                rx
            };

            let mut pending = PendingSlot {
                gate: Arc::clone(self),
                rx: Some(rx),
            };
            if pending.wait().await {
                return GateSlot {
                    gate: Arc::clone(self),
                };
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop() {
            // A failed send means the waiter went away; try the next one.
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        state.available = (state.available + 1).min(self.capacity);
    }
}

/// A queued request for a slot.
///
/// If the request is dropped after the slot was handed over but before it
/// was observed, the slot is passed on.
struct PendingSlot {
    gate: Arc<PriorityGate>,
    rx: Option<oneshot::Receiver<()>>,
}

impl PendingSlot {
    async fn wait(&mut self) -> bool {
        let granted = match self.rx.as_mut() {
            Some(rx) => rx.await.is_ok(),
            None => false,
        };
        self.rx = None;
        granted
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.gate.release();
            }
        }
    }
}

/// A held slot, released on drop.
#[derive(Debug)]
pub(crate) struct GateSlot {
    gate: Arc<PriorityGate>,
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        self.gate.release();
    }
}
