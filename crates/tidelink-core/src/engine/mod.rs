//! Connection state machine.
//!
//! `Idle -> Connecting -> Connected | Failed`, `Failed -> Retrying ->
//! Connecting` while the retry budget lasts, `Failed -> ConfigPortal` once it
//! is spent or a relocation is detected. All transitions happen inside
//! [`ConnectionEngine::tick`].

use core::net::Ipv4Addr;

use log::{info, warn};

use crate::{
    diagnostics::{DEFAULT_WEAK_SIGNAL_DBM, FailureCause, diagnose},
    fingerprint::{Fingerprint, FingerprintStore, KeyValueStore, classify},
    network::{
        ConnectPoll, Credentials, FailureReason, NetworkDriver, NetworkIdentity, ScanList,
        ScanPoll,
    },
    retry::{PortalReason, RetryAction, RetryPolicy, RetryState},
    status::ConnectivityStatus,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickResult {
    Unchanged,
    StatusChanged(ConnectivityStatus),
    /// Entered configuration mode on this tick. Reported once per entry.
    ConfigPortalRequested,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Timeout of the first attempt in a streak; doubles per failure.
    pub connect_timeout_ms: u64,
    pub max_connect_timeout_ms: u64,
    /// Diagnostic threshold only.
    pub weak_signal_dbm: i8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout_ms: 20_000,
            max_connect_timeout_ms: 60_000,
            weak_signal_dbm: DEFAULT_WEAK_SIGNAL_DBM,
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout_for(&self, failures: u8) -> u64 {
        let shift = failures.min(16);
        self.connect_timeout_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_connect_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanStage {
    NotStarted,
    InFlight,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineState {
    Idle,
    Connecting {
        started_ms: u64,
        deadline_ms: u64,
    },
    Connected {
        address: Ipv4Addr,
        /// Fingerprint refresh scan still running.
        refreshing: bool,
    },
    Failed {
        reason: FailureReason,
        scan: ScanStage,
    },
    Retrying {
        due_ms: u64,
    },
    ConfigPortal {
        reason: PortalReason,
    },
}

impl EngineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Failed { .. } => "failed",
            Self::Retrying { .. } => "retrying",
            Self::ConfigPortal { .. } => "config_portal",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptOutcome {
    Pending,
    Success,
    Failure(FailureReason),
}

/// The most recent connection attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionAttempt {
    pub target: NetworkIdentity,
    pub started_ms: u64,
    pub outcome: AttemptOutcome,
}

pub struct ConnectionEngine<D, KV>
where
    D: NetworkDriver,
    KV: KeyValueStore,
{
    driver: D,
    store: FingerprintStore<KV>,
    config: EngineConfig,
    target: Option<(NetworkIdentity, Credentials)>,
    stored: Fingerprint,
    retry: RetryState,
    state: EngineState,
    status: ConnectivityStatus,
    attempt: Option<ConnectionAttempt>,
    last_failure: Option<FailureCause>,
    scan: ScanList,
    pending_credentials: Option<(NetworkIdentity, Credentials)>,
    reset_requested: bool,
    reconnected: bool,
}

impl<D, KV> ConnectionEngine<D, KV>
where
    D: NetworkDriver,
    KV: KeyValueStore,
{
    /// Loads the persisted fingerprint. `target` is `None` on first setup.
    pub fn new(
        driver: D,
        mut store: FingerprintStore<KV>,
        config: EngineConfig,
        target: Option<(NetworkIdentity, Credentials)>,
    ) -> Self {
        let stored = store.load();
        Self {
            driver,
            store,
            config,
            target,
            stored,
            retry: RetryState::new(),
            state: EngineState::Idle,
            status: ConnectivityStatus::Connecting,
            attempt: None,
            last_failure: None,
            scan: ScanList::new(),
            pending_credentials: None,
            reset_requested: false,
            reconnected: false,
        }
    }

    pub fn current_status(&self) -> ConnectivityStatus {
        self.status
    }

    pub fn last_failure(&self) -> Option<FailureCause> {
        self.last_failure
    }

    /// Human-readable cause of the latest failure, cleared on success.
    pub fn last_failure_reason(&self) -> Option<&'static str> {
        self.last_failure.map(FailureCause::message)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.stored
    }

    pub fn target(&self) -> Option<&NetworkIdentity> {
        self.target.as_ref().map(|(identity, _)| identity)
    }

    pub fn last_attempt(&self) -> Option<&ConnectionAttempt> {
        self.attempt.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn store(&self) -> &FingerprintStore<KV> {
        &self.store
    }

    /// True once after a link comes back following a failure streak, so the
    /// data fetcher can refresh immediately.
    pub fn take_reconnected(&mut self) -> bool {
        core::mem::take(&mut self.reconnected)
    }

    /// New credentials from the configuration collaborator. Applied at the
    /// next tick, interrupting any attempt in progress.
    pub fn credentials_updated(&mut self, identity: NetworkIdentity, credentials: Credentials) {
        self.pending_credentials = Some((identity, credentials));
    }

    /// Clears credentials and the persisted fingerprint at the next tick.
    /// Credentials supplied before the reset are discarded with it.
    pub fn factory_reset(&mut self) {
        self.reset_requested = true;
        self.pending_credentials = None;
    }

    pub fn into_parts(self) -> (D, FingerprintStore<KV>) {
        (self.driver, self.store)
    }
}

include!("runtime.rs");

#[cfg(test)]
mod tests;
