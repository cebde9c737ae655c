//! The small set of booleans every worker reads between batches to decide
//! whether to keep running.

use tokio::sync::watch;

/// The control flags workers consult between batches. Flag transitions
/// never interrupt an in-progress batch; workers only observe them at batch
/// boundaries.
#[derive(Clone)]
pub struct ControlFlags {
    running: watch::Sender<bool>,
    syncing: watch::Sender<bool>,
    connected: watch::Sender<bool>,
    startup: watch::Sender<bool>,
    paused_by_user: watch::Sender<bool>,
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFlags {
    /// Creates a fresh flag set: not running, not syncing, not connected,
    /// not in startup, not paused.
    #[must_use]
    pub fn new() -> Self {
        Self {
            running: watch::Sender::new(false),
            syncing: watch::Sender::new(false),
            connected: watch::Sender::new(false),
            startup: watch::Sender::new(false),
            paused_by_user: watch::Sender::new(false),
        }
    }

    /// Whether the daemon should keep its workers running at all.
    #[must_use]
    pub fn running(&self) -> bool {
        *self.running.borrow()
    }

    /// Sets the running flag.
    pub fn set_running(&self, value: bool) {
        let _ = self.running.send(value);
    }

    /// A receiver that resolves once `running` becomes `false`, for workers
    /// to race against their own blocking operation.
    #[must_use]
    pub fn running_receiver(&self) -> watch::Receiver<bool> {
        self.running.subscribe()
    }

    /// Whether a sync batch may currently proceed (not paused, not mid
    /// startup).
    #[must_use]
    pub fn syncing(&self) -> bool {
        *self.syncing.borrow()
    }

    /// Sets the syncing flag.
    pub fn set_syncing(&self, value: bool) {
        let _ = self.syncing.send(value);
    }

    /// Whether the last connection probe succeeded.
    #[must_use]
    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Sets the connected flag. A `false` -> `true` transition re-latches
    /// `startup` and clears `syncing`, the transition the documented
    /// lifecycle requires on reconnection: `Disconnected` always re-enters
    /// `Startup` rather than resuming `Syncing` directly, so the resume
    /// reconciliation pass runs again before the remote listener resumes
    /// long-polling from its old cursor. Any worker may observe and report
    /// a disconnect (the probe or the remote listener), so the edge is
    /// detected here rather than by each caller tracking its own history.
    pub fn set_connected(&self, value: bool) {
        if value && !*self.connected.borrow() {
            let _ = self.syncing.send(false);
            let _ = self.startup.send(true);
        }
        let _ = self.connected.send(value);
    }

    /// Whether the daemon is performing its initial/resume reconciliation.
    #[must_use]
    pub fn startup(&self) -> bool {
        *self.startup.borrow()
    }

    /// Sets the startup flag.
    pub fn set_startup(&self, value: bool) {
        let _ = self.startup.send(value);
    }

    /// Whether the operator has explicitly paused syncing.
    #[must_use]
    pub fn paused_by_user(&self) -> bool {
        *self.paused_by_user.borrow()
    }

    /// Sets the paused-by-user flag.
    pub fn set_paused_by_user(&self, value: bool) {
        let _ = self.paused_by_user.send(value);
    }

    /// Whether both the local event handler and the remote listener are
    /// allowed to enqueue and apply batches right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        (self.syncing() || self.startup()) && !self.paused_by_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_all_false() {
        let flags = ControlFlags::new();
        assert!(!flags.running());
        assert!(!flags.syncing());
        assert!(!flags.connected());
        assert!(!flags.startup());
        assert!(!flags.paused_by_user());
    }

    #[test]
    fn is_active_requires_syncing_or_startup_and_not_paused() {
        let flags = ControlFlags::new();
        assert!(!flags.is_active());

        flags.set_syncing(true);
        assert!(flags.is_active());

        flags.set_paused_by_user(true);
        assert!(!flags.is_active());

        flags.set_paused_by_user(false);
        flags.set_syncing(false);
        flags.set_startup(true);
        assert!(flags.is_active());
    }

    #[test]
    fn reconnecting_reenters_startup_and_clears_syncing() {
        let flags = ControlFlags::new();
        flags.set_startup(false);
        flags.set_syncing(true);
        flags.set_connected(true);

        assert!(flags.connected());
        assert!(flags.startup());
        assert!(!flags.syncing());
    }

    #[test]
    fn staying_connected_does_not_reenter_startup() {
        let flags = ControlFlags::new();
        flags.set_connected(true);
        flags.set_startup(false);
        flags.set_syncing(true);

        // Already connected: a repeated `set_connected(true)` is not a
        // reconnection and must not disturb `syncing`/`startup`.
        flags.set_connected(true);
        assert!(!flags.startup());
        assert!(flags.syncing());
    }
}
