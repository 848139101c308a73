use std::sync::Arc;
use tokio::sync::watch;

/// One-shot, multi-waiter readiness signal.
///
/// The value is set at most once; every waiter, present or future, observes
/// that same value.
#[derive(Debug)]
pub struct ReadySignal<T> {
    slot: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for ReadySignal<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone> ReadySignal<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Stores `value` and wakes every waiter. Returns `false` if the signal
    /// had already fired; the stored value is left untouched in that case.
    pub fn fire(&self, value: T) -> bool {
        let mut value = Some(value);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub fn is_fired(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn peek(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Suspends until the signal fires; returns immediately if it already has.
    pub async fn wait(&self) -> T {
        let mut rx = self.slot.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            // `self` keeps the sender alive, so this only resolves on a send.
            let _ = rx.changed().await;
        }
    }
}

impl<T: Clone> Default for ReadySignal<T> {
    fn default() -> Self {
        Self::new()
    }
}
