//! Human-facing failure diagnosis.
//!
//! A driver reason says what the radio saw. A [`FailureCause`] refines it with
//! the post-failure scan so the UI can tell "check password" apart from
//! "check range".

use crate::network::{FailureReason, NetworkIdentity, SecurityClass};

pub const DEFAULT_WEAK_SIGNAL_DBM: i8 = -85;

/// Failure taxonomy used to pick a hint for the user.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureCategory {
    /// Range, router power, timing. Retried.
    Transient,
    /// Password or security mode. Retried, but the user likely has to act.
    Credential,
    /// The device was moved.
    Environment,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureCause {
    Timeout,
    WrongPassword,
    NetworkNotFound,
    WeakSignal { rssi_dbm: i8 },
    UnsupportedSecurity,
    SignalLost,
    NoNetworksVisible,
    DriverFault,
    Unspecified(u8),
    NewLocation,
}

impl FailureCause {
    pub const fn from_reason(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Timeout => Self::Timeout,
            FailureReason::AuthRejected => Self::WrongPassword,
            FailureReason::NotFound => Self::NetworkNotFound,
            FailureReason::LinkLost => Self::SignalLost,
            FailureReason::Driver => Self::DriverFault,
            FailureReason::Unspecified(code) => Self::Unspecified(code),
        }
    }

    pub const fn category(self) -> FailureCategory {
        match self {
            Self::WrongPassword | Self::UnsupportedSecurity => FailureCategory::Credential,
            Self::NewLocation => FailureCategory::Environment,
            _ => FailureCategory::Transient,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::Timeout => "Connection timeout - check WiFi name and password",
            Self::WrongPassword => "Wrong password",
            Self::NetworkNotFound => "WiFi network not found - check WiFi name",
            Self::WeakSignal { .. } => {
                "Weak signal - move the lamp closer to the router or use a WiFi extender"
            }
            Self::UnsupportedSecurity => {
                "Router uses WPA3-only security - switch it to WPA2/WPA3 mixed mode"
            }
            Self::SignalLost => "WiFi signal lost - router may be off or out of range",
            Self::NoNetworksVisible => {
                "No WiFi networks found - check that the router is powered on and in range"
            }
            Self::DriverFault => "WiFi hardware error",
            Self::Unspecified(_) => "Connection failed",
            Self::NewLocation => "Moved to new location - please reconfigure WiFi",
        }
    }
}

/// Refines `reason` with what the scan shows about `target`.
///
/// `scan` is `None` when no scan result is available, in which case the
/// driver reason stands. Signal strength only changes the reported cause,
/// never the retry decision.
pub fn diagnose(
    target: &NetworkIdentity,
    reason: FailureReason,
    scan: Option<&[NetworkIdentity]>,
    weak_signal_dbm: i8,
) -> FailureCause {
    let Some(scan) = scan else {
        return FailureCause::from_reason(reason);
    };
    if scan.is_empty() {
        return FailureCause::NoNetworksVisible;
    }

    let best = scan
        .iter()
        .filter(|network| network.same_network(target))
        .max_by_key(|network| network.rssi_dbm().unwrap_or(i8::MIN));
    let Some(best) = best else {
        return FailureCause::NetworkNotFound;
    };

    if let Some(rssi_dbm) = best.rssi_dbm()
        && rssi_dbm < weak_signal_dbm
    {
        return FailureCause::WeakSignal { rssi_dbm };
    }
    if best.security() == Some(SecurityClass::Wpa3) {
        return FailureCause::UnsupportedSecurity;
    }

    FailureCause::from_reason(reason)
}
