use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// A one-shot, idempotent cancellation latch shared between the orchestrator,
/// its process channel, and every in-flight control request.
///
/// Triggering is permanent: once fired, `is_cancelled` never goes back to
/// `false` and every waiter on `cancelled()` resolves immediately, including
/// waiters that subscribe after the fact.
#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

struct Inner {
    fired: Mutex<bool>,
    notify: Notify,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                fired: Mutex::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Fires the handle. Safe to call more than once; only the first call
    /// has any effect.
    pub fn cancel(&self) {
        let mut fired = self.inner.fired.lock().expect("cancellation mutex poisoned");
        if *fired {
            return;
        }
        *fired = true;
        // Drop the guard before waking waiters so a woken task can
        // immediately observe `is_cancelled() == true`.
        drop(fired);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.fired.lock().expect("cancellation mutex poisoned")
    }

    /// Resolves once the handle fires. Resolves immediately if it has
    /// already fired by the time this is called.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        // Re-check after subscribing: cancel() may have fired between the
        // `is_cancelled` check above and the `notified()` subscription.
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_idempotent_and_wakes_waiters() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());

        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_fired() {
        let handle = CancellationHandle::new();
        handle.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), handle.cancelled())
            .await
            .expect("cancelled() must resolve immediately once fired");
    }
}
