//! Open/closed latch used to pause a producer task.

use std::sync::Arc;
use tokio::sync::watch;

/// Binary latch. A producer calls [`EventGate::when_open`] before each unit
/// of work; a consumer closes the gate to hold the producer in place.
///
/// Only one producer is expected to wait on a gate at a time.
#[derive(Debug, Clone)]
pub struct EventGate {
    state: Arc<watch::Sender<bool>>,
}

impl EventGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (state, _) = watch::channel(true);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn open(&self) {
        self.state.send_replace(true);
    }

    pub fn close(&self) {
        self.state.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Runs `action` now if the gate is open, otherwise once it reopens.
    pub async fn when_open<F, T>(&self, action: F) -> T
    where
        F: FnOnce() -> T,
    {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|open| *open).await;
        action()
    }

    /// Closes the gate until the returned guard is dropped.
    pub fn pause(&self) -> PauseGuard {
        self.close();
        PauseGuard { gate: self.clone() }
    }
}

impl Default for EventGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Reopens its gate on drop, whatever the exit path of the paused work.
#[must_use = "the gate reopens as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PauseGuard {
    gate: EventGate,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.gate.open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn runs_immediately_when_open() {
        let gate = EventGate::new();
        let value = gate.when_open(|| 42).await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn waits_for_reopen() {
        let gate = EventGate::new();
        gate.close();
        let ran = Arc::new(AtomicBool::new(false));

        let waiter = {
            let gate = gate.clone();
            let ran = ran.clone();
            tokio::spawn(async move { gate.when_open(|| ran.store(true, Ordering::SeqCst)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!ran.load(Ordering::SeqCst));

        gate.open();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once the gate opens")
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pause_guard_reopens_on_drop() {
        let gate = EventGate::new();
        {
            let _guard = gate.pause();
            assert!(!gate.is_open());
        }
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn pause_guard_reopens_on_panic() {
        let gate = EventGate::new();
        let inner = gate.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.pause();
            panic!("work failed");
        }));
        assert!(result.is_err());
        assert!(gate.is_open());
    }
}
