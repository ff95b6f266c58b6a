//! Connectivity status published to indicator and data-fetch consumers.

/// Default age after which fetched data is considered stale: two missed
/// fetches plus grace.
pub const DEFAULT_STALE_AFTER_MS: u64 = 30 * 60 * 1_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectivityStatus {
    Connecting = 0,
    ConnectedFresh = 1,
    ConnectedStale = 2,
    WiFiError = 3,
    ConfigPortalRequired = 4,
}

impl ConnectivityStatus {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::ConnectedFresh,
            2 => Self::ConnectedStale,
            3 => Self::WiFiError,
            4 => Self::ConfigPortalRequired,
            _ => Self::Connecting,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::ConnectedFresh => "connected_fresh",
            Self::ConnectedStale => "connected_stale",
            Self::WiFiError => "wifi_error",
            Self::ConfigPortalRequired => "config_portal_required",
        }
    }

    pub const fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedFresh | Self::ConnectedStale)
    }

    /// Folds in the age of the last fetched payload.
    ///
    /// Only a fresh connection can become stale; `None` means nothing has
    /// been fetched yet.
    pub const fn with_data_age(self, data_age_ms: Option<u64>, policy: StalenessPolicy) -> Self {
        match self {
            Self::ConnectedFresh => match data_age_ms {
                Some(age_ms) if age_ms <= policy.stale_after_ms => Self::ConnectedFresh,
                _ => Self::ConnectedStale,
            },
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StalenessPolicy {
    pub stale_after_ms: u64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_link_goes_stale_past_threshold() {
        let policy = StalenessPolicy::default();
        let fresh = ConnectivityStatus::ConnectedFresh;
        assert_eq!(
            fresh.with_data_age(Some(60_000), policy),
            ConnectivityStatus::ConnectedFresh
        );
        assert_eq!(
            fresh.with_data_age(Some(DEFAULT_STALE_AFTER_MS + 1), policy),
            ConnectivityStatus::ConnectedStale
        );
        assert_eq!(
            fresh.with_data_age(None, policy),
            ConnectivityStatus::ConnectedStale
        );
    }

    #[test]
    fn wifi_states_ignore_data_age() {
        let policy = StalenessPolicy::default();
        for status in [
            ConnectivityStatus::Connecting,
            ConnectivityStatus::WiFiError,
            ConnectivityStatus::ConfigPortalRequired,
        ] {
            assert_eq!(status.with_data_age(None, policy), status);
            assert_eq!(status.with_data_age(Some(0), policy), status);
        }
    }

    #[test]
    fn raw_round_trip() {
        for status in [
            ConnectivityStatus::Connecting,
            ConnectivityStatus::ConnectedFresh,
            ConnectivityStatus::ConnectedStale,
            ConnectivityStatus::WiFiError,
            ConnectivityStatus::ConfigPortalRequired,
        ] {
            assert_eq!(ConnectivityStatus::from_raw(status as u8), status);
        }
    }
}
