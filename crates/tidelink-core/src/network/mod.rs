//! Network driver abstraction and the values exchanged with it.

use core::net::Ipv4Addr;

use heapless::{String, Vec};

pub mod mock;

pub const SSID_MAX_BYTES: usize = 32;
pub const PASSWORD_MAX_BYTES: usize = 64;
pub const SCAN_CAPACITY: usize = 16;

pub type Ssid = String<SSID_MAX_BYTES>;
pub type ScanList = Vec<NetworkIdentity, SCAN_CAPACITY>;

/// Security class advertised by an access point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecurityClass {
    Open,
    Wpa2,
    Wpa3,
    Unknown,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdentityError {
    SsidTooLong,
    PasswordTooLong,
}

/// One network as observed during a scan, or the configured target.
///
/// SSIDs are compared byte-for-byte; non-ASCII names are kept as-is.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkIdentity {
    ssid: Ssid,
    rssi_dbm: Option<i8>,
    security: Option<SecurityClass>,
}

impl NetworkIdentity {
    pub fn new(ssid: &str) -> Result<Self, IdentityError> {
        let mut stored = Ssid::new();
        stored
            .push_str(ssid)
            .map_err(|_| IdentityError::SsidTooLong)?;
        Ok(Self {
            ssid: stored,
            rssi_dbm: None,
            security: None,
        })
    }

    pub fn with_rssi(mut self, rssi_dbm: i8) -> Self {
        self.rssi_dbm = Some(rssi_dbm);
        self
    }

    pub fn with_security(mut self, security: SecurityClass) -> Self {
        self.security = Some(security);
        self
    }

    pub fn ssid(&self) -> &str {
        self.ssid.as_str()
    }

    pub fn rssi_dbm(&self) -> Option<i8> {
        self.rssi_dbm
    }

    pub fn security(&self) -> Option<SecurityClass> {
        self.security
    }

    /// Hidden networks broadcast an empty SSID.
    pub fn is_hidden(&self) -> bool {
        self.ssid.is_empty()
    }

    /// Identity comparison ignores scan metadata.
    pub fn same_network(&self, other: &NetworkIdentity) -> bool {
        self.ssid == other.ssid
    }
}

/// Secret used to join the target network. An empty password means an open
/// network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credentials {
    password: String<PASSWORD_MAX_BYTES>,
}

impl Credentials {
    pub fn new(password: &str) -> Result<Self, IdentityError> {
        let mut stored = String::new();
        stored
            .push_str(password)
            .map_err(|_| IdentityError::PasswordTooLong)?;
        Ok(Self { password: stored })
    }

    pub fn open() -> Self {
        Self {
            password: String::new(),
        }
    }

    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

/// Driver-level reason for a failed attempt or a dropped link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureReason {
    Timeout,
    AuthRejected,
    NotFound,
    LinkLost,
    /// The driver refused to start the operation at all.
    Driver,
    Unspecified(u8),
}

impl FailureReason {
    /// Maps an 802.11 / ESP-IDF station disconnect reason code.
    pub const fn from_disconnect_code(code: u8) -> Self {
        match code {
            2 | 3 | 6 | 7 | 15 | 23 => Self::AuthRejected,
            4 | 200 => Self::LinkLost,
            8 => Self::Timeout,
            201 | 210 | 211 | 212 => Self::NotFound,
            202 | 203 | 204 => Self::AuthRejected,
            other => Self::Unspecified(other),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::AuthRejected => "auth_rejected",
            Self::NotFound => "not_found",
            Self::LinkLost => "link_lost",
            Self::Driver => "driver",
            Self::Unspecified(_) => "unspecified",
        }
    }
}

/// Result of polling an in-progress connection attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectPoll {
    Pending,
    /// Link is up and an address has been assigned.
    Connected(Ipv4Addr),
    Failed(FailureReason),
}

/// Result of polling an in-progress scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanPoll {
    Pending,
    /// Results were written to the caller's list (possibly none).
    Complete,
    Failed,
}

/// Radio capability consumed by the engine.
///
/// Every operation returns immediately; long-running work is started with a
/// `begin_*` call and observed through the matching `poll_*` call on later
/// ticks.
pub trait NetworkDriver {
    type Error: core::fmt::Debug;

    fn begin_connect(
        &mut self,
        target: &NetworkIdentity,
        credentials: &Credentials,
    ) -> Result<(), Self::Error>;

    fn poll_connect(&mut self) -> ConnectPoll;

    fn begin_scan(&mut self) -> Result<(), Self::Error>;

    /// Best effort. `out` is cleared and refilled only on `Complete`.
    fn poll_scan(&mut self, out: &mut ScanList) -> ScanPoll;

    /// Reports an asynchronous disconnect of an established link, once.
    fn poll_link_lost(&mut self) -> Option<FailureReason>;

    fn disconnect(&mut self);
}
