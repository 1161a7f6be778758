//! Fire-once, observable-by-many signal.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// A one-shot event: an atomic flag plus a broadcast channel.
///
/// Many actors need a "fire once, observed by many" signal (channel close,
/// server shutdown). [`Event::fire`] is idempotent; [`Event::done`]
/// resolves immediately if the event already fired, otherwise waits.
#[derive(Debug)]
pub struct Event {
    fired: AtomicBool,
    tx: broadcast::Sender<()>,
}

impl Event {
    /// A new unfired event.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);

        Self { fired: AtomicBool::new(false), tx }
    }

    /// Fire the event. Returns `true` on the first call, `false` after.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        // No receivers is fine; late observers see the flag.
        let _ = self.tx.send(());

        true
    }

    /// Whether the event has fired.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait until the event fires.
    pub async fn done(&self) {
        // Subscribe before checking the flag: a fire between the check and
        // the recv is then guaranteed to reach the receiver.
        let mut rx = self.tx.subscribe();

        if self.has_fired() {
            return;
        }

        let _ = rx.recv().await;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn fire_is_idempotent() {
        let event = Event::new();

        assert!(!event.has_fired());
        assert!(event.fire());
        assert!(!event.fire());
        assert!(event.has_fired());
    }

    #[tokio::test]
    async fn done_resolves_for_late_and_early_waiters() {
        let event = Arc::new(Event::new());

        let early = {
            let event = Arc::clone(&event);
            tokio::spawn(async move { event.done().await })
        };

        tokio::task::yield_now().await;
        event.fire();

        early.await.unwrap();
        event.done().await; // late observer
    }
}
