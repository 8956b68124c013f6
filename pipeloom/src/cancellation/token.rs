//! Run-wide abort signal.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback run once when a token is cancelled.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// Abort signal shared by every task of a run.
///
/// The first reason passed to [`CancellationToken::cancel`] is kept and later
/// calls are ignored. Tasks either poll [`CancellationToken::is_cancelled`] or
/// await [`CancellationToken::cancelled`].
#[derive(Default)]
pub struct CancellationToken {
    /// Published only after `reason` is written.
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: Mutex<Vec<(u64, CancelCallback)>>,
    next_callback: AtomicU64,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token. Only the first reason is kept.
    ///
    /// Registered callbacks run once, on the cancelling thread. A panicking
    /// callback is logged and does not stop the others.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut current = self.reason.write();
            if current.is_some() {
                return;
            }
            *current = Some(reason.into());
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for (_, callback) in &callbacks {
            Self::invoke(callback);
        }
    }

    /// Registers a callback for cancellation.
    ///
    /// Runs it immediately if the token is already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(Box::new(callback));
    }

    /// Returns whether the token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the reason of the first cancellation.
    ///
    /// Always `Some` once [`CancellationToken::is_cancelled`] returns true.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Number of callbacks waiting for cancellation.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Creates a token that follows this one.
    ///
    /// The child is cancelled with this token's reason when this token is
    /// cancelled. Cancelling the child leaves this token alone. Dropping the
    /// returned [`ChildToken`] unlinks it.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> ChildToken {
        let token = Arc::new(Self::new());
        let follower = Arc::downgrade(&token);
        let parent = Arc::downgrade(self);
        let callback_id = self.register(Box::new(move || {
            let Some(child) = follower.upgrade() else {
                return;
            };
            let reason = parent
                .upgrade()
                .and_then(|p| p.reason())
                .unwrap_or_else(|| "parent token cancelled".to_string());
            child.cancel(reason);
        }));
        ChildToken {
            token,
            parent: Arc::downgrade(self),
            callback_id,
        }
    }

    /// Stores `callback`, or runs it now if already cancelled.
    ///
    /// The check and the push share the callbacks lock, so a concurrent
    /// `cancel` either sees the callback or is seen by the check.
    fn register(&self, callback: CancelCallback) -> Option<u64> {
        let mut callbacks = self.callbacks.lock();
        if self.is_cancelled() {
            drop(callbacks);
            Self::invoke(&callback);
            return None;
        }
        let id = self.next_callback.fetch_add(1, Ordering::Relaxed);
        callbacks.push((id, callback));
        Some(id)
    }

    fn deregister(&self, id: u64) {
        self.callbacks.lock().retain(|(registered, _)| *registered != id);
    }

    fn invoke(callback: &CancelCallback) {
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())) {
            warn!("Cancellation callback panicked: {:?}", e);
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

/// A token linked to a parent by [`CancellationToken::child`].
///
/// Dropping it removes the link from the parent, so a long-lived parent only
/// holds links for children still in use.
#[derive(Debug)]
pub struct ChildToken {
    token: Arc<CancellationToken>,
    parent: Weak<CancellationToken>,
    callback_id: Option<u64>,
}

impl ChildToken {
    /// Returns the child token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }
}

impl Deref for ChildToken {
    type Target = CancellationToken;

    fn deref(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ChildToken {
    fn drop(&mut self) {
        if let (Some(id), Some(parent)) = (self.callback_id, self.parent.upgrade()) {
            parent.deregister(id);
        }
    }
}
