//! Connectivity tracking.
//!
//! A watch channel carries the online flag; the health probe flips it and
//! the auto-sync loop reacts to the offline→online transition.

use tokio::sync::watch;

use crate::remote::RemoteApi;

/// Tracks whether the remote is reachable.
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self { sender }
    }

    /// A receiver for the online flag; `changed()` fires on transitions.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record a state observed out-of-band (platform hook, test).
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }

    /// Probe the remote's liveness endpoint and record the outcome.
    pub async fn probe(&self, remote: &dyn RemoteApi) -> bool {
        let alive = remote.health().await;
        if alive != self.is_online() {
            tracing::info!(online = alive, "connectivity changed");
        }
        self.set_online(alive);
        alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_observable() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.watch();

        assert!(!monitor.is_online());
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(true);
        assert!(monitor.is_online());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        // Setting the same state again is not a transition.
        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
