//! Connectivity status shared between the network loop and its consumers.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use tidelink_core::{
    engine::TickResult,
    status::{ConnectivityStatus, StalenessPolicy},
};

/// Immutable status snapshot for the indicator and the data fetcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivitySnapshot {
    pub status: ConnectivityStatus,
    pub portal_requested: bool,
    pub revision: u32,
}

impl ConnectivitySnapshot {
    /// Status to render given the age of the last fetched payload.
    pub const fn display_status(
        self,
        data_age_ms: Option<u64>,
        policy: StalenessPolicy,
    ) -> ConnectivityStatus {
        self.status.with_data_age(data_age_ms, policy)
    }
}

/// Lock-free shared connectivity status.
///
/// Written only by the task that ticks the engine. Readers re-render when
/// `revision` moves.
#[derive(Debug)]
pub struct ConnectivityHandle {
    status: AtomicU8,
    portal_requested: AtomicBool,
    revision: AtomicU32,
}

impl ConnectivityHandle {
    pub const fn new() -> Self {
        Self {
            status: AtomicU8::new(ConnectivityStatus::Connecting as u8),
            portal_requested: AtomicBool::new(false),
            revision: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            status: ConnectivityStatus::from_raw(self.status.load(Ordering::Acquire)),
            portal_requested: self.portal_requested.load(Ordering::Acquire),
            revision: self.revision.load(Ordering::Acquire),
        }
    }

    /// Returns whether the stored status changed.
    pub fn publish(&self, status: ConnectivityStatus) -> bool {
        let changed = self.status.swap(status as u8, Ordering::AcqRel) != status as u8;
        if changed {
            self.bump_revision();
        }
        changed
    }

    /// Forwards the outcome of one engine tick.
    pub fn apply(&self, result: TickResult) -> bool {
        match result {
            TickResult::Unchanged => false,
            TickResult::StatusChanged(status) => self.publish(status),
            TickResult::ConfigPortalRequested => {
                self.portal_requested.store(true, Ordering::Release);
                self.publish(ConnectivityStatus::ConfigPortalRequired);
                true
            }
        }
    }

    /// Clears and returns the portal latch. The configuration collaborator
    /// calls this once it has started serving the portal.
    pub fn take_portal_request(&self) -> bool {
        self.portal_requested.swap(false, Ordering::AcqRel)
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_moves_only_on_change() {
        let handle = ConnectivityHandle::new();
        assert_eq!(handle.snapshot().revision, 0);

        assert!(!handle.publish(ConnectivityStatus::Connecting));
        assert!(handle.publish(ConnectivityStatus::ConnectedFresh));
        assert!(!handle.apply(TickResult::Unchanged));
        assert!(!handle.publish(ConnectivityStatus::ConnectedFresh));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, ConnectivityStatus::ConnectedFresh);
        assert_eq!(snapshot.revision, 1);
    }

    #[test]
    fn portal_request_latches_until_taken() {
        let handle = ConnectivityHandle::new();
        assert!(handle.apply(TickResult::ConfigPortalRequested));

        let snapshot = handle.snapshot();
        assert!(snapshot.portal_requested);
        assert_eq!(snapshot.status, ConnectivityStatus::ConfigPortalRequired);

        assert!(handle.take_portal_request());
        assert!(!handle.take_portal_request());
        assert_eq!(
            handle.snapshot().status,
            ConnectivityStatus::ConfigPortalRequired
        );
    }

    #[test]
    fn stale_data_shows_on_fresh_link_only() {
        let handle = ConnectivityHandle::new();
        handle.apply(TickResult::StatusChanged(ConnectivityStatus::ConnectedFresh));
        let policy = StalenessPolicy::default();

        let snapshot = handle.snapshot();
        assert_eq!(
            snapshot.display_status(Some(31 * 60 * 1_000), policy),
            ConnectivityStatus::ConnectedStale
        );
        assert_eq!(
            snapshot.display_status(Some(5 * 60 * 1_000), policy),
            ConnectivityStatus::ConnectedFresh
        );

        handle.publish(ConnectivityStatus::WiFiError);
        assert_eq!(
            handle.snapshot().display_status(None, policy),
            ConnectivityStatus::WiFiError
        );
    }
}
