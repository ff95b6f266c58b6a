use core::{convert::Infallible, net::Ipv4Addr};

use log::debug;
use tidelink_core::network::{
    ConnectPoll, Credentials, FailureReason, NetworkDriver, NetworkIdentity, ScanList, ScanPoll,
    SecurityClass,
};

const CONNECT_LATENCY_MS: u64 = 1_500;
const SCAN_LATENCY_MS: u64 = 2_000;
const SIM_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 23);

#[derive(Debug, Clone)]
pub(super) struct SimNetwork {
    pub(super) ssid: String,
    pub(super) password: String,
    pub(super) rssi_dbm: i8,
    pub(super) security: SecurityClass,
}

impl SimNetwork {
    pub(super) fn wpa2(ssid: &str, password: &str, rssi_dbm: i8) -> Self {
        Self {
            ssid: ssid.to_owned(),
            password: password.to_owned(),
            rssi_dbm,
            security: SecurityClass::Wpa2,
        }
    }
}

#[derive(Debug, Clone)]
struct Outage {
    ssid: String,
    from_ms: u64,
    until_ms: u64,
}

#[derive(Debug)]
struct PendingConnect {
    ssid: String,
    password: String,
    ready_ms: u64,
}

/// Radio environment driven by simulated time.
///
/// The harness calls [`SimDriver::set_time`] before each engine tick; the
/// driver resolves in-flight operations against the networks that are up
/// at that instant.
#[derive(Debug)]
pub(super) struct SimDriver {
    now_ms: u64,
    networks: Vec<SimNetwork>,
    outages: Vec<Outage>,
    connect: Option<PendingConnect>,
    scan_ready_ms: Option<u64>,
    link: Option<String>,
    link_lost: Option<FailureReason>,
    connect_calls: u32,
}

impl SimDriver {
    pub(super) fn new(networks: Vec<SimNetwork>) -> Self {
        Self {
            now_ms: 0,
            networks,
            outages: Vec::new(),
            connect: None,
            scan_ready_ms: None,
            link: None,
            link_lost: None,
            connect_calls: 0,
        }
    }

    pub(super) fn connect_calls(&self) -> u32 {
        self.connect_calls
    }

    /// Powers `ssid` off for `duration_ms` starting at `from_ms`.
    pub(super) fn schedule_outage(&mut self, ssid: &str, from_ms: u64, duration_ms: u64) {
        self.outages.push(Outage {
            ssid: ssid.to_owned(),
            from_ms,
            until_ms: from_ms.saturating_add(duration_ms),
        });
    }

    pub(super) fn set_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;

        let Some(ssid) = self.link.as_deref() else {
            return;
        };
        if self.reachable(ssid).is_none() {
            debug!("sim: {} went away at t={}ms", ssid, now_ms);
            self.link = None;
            self.link_lost = Some(FailureReason::LinkLost);
        }
    }

    fn reachable(&self, ssid: &str) -> Option<&SimNetwork> {
        let down = self.outages.iter().any(|outage| {
            outage.ssid == ssid && (outage.from_ms..outage.until_ms).contains(&self.now_ms)
        });
        if down {
            return None;
        }
        self.networks.iter().find(|network| network.ssid == ssid)
    }
}

impl NetworkDriver for SimDriver {
    type Error = Infallible;

    fn begin_connect(
        &mut self,
        target: &NetworkIdentity,
        credentials: &Credentials,
    ) -> Result<(), Self::Error> {
        self.connect_calls += 1;
        self.link = None;
        self.connect = Some(PendingConnect {
            ssid: target.ssid().to_owned(),
            password: credentials.password().to_owned(),
            ready_ms: self.now_ms + CONNECT_LATENCY_MS,
        });
        Ok(())
    }

    fn poll_connect(&mut self) -> ConnectPoll {
        let Some(pending) = self.connect.as_ref() else {
            return ConnectPoll::Pending;
        };
        if self.now_ms < pending.ready_ms {
            return ConnectPoll::Pending;
        }

        let result = match self.reachable(&pending.ssid) {
            None => ConnectPoll::Failed(FailureReason::NotFound),
            Some(network) if network.password != pending.password => {
                ConnectPoll::Failed(FailureReason::AuthRejected)
            }
            Some(_) => ConnectPoll::Connected(SIM_ADDRESS),
        };
        if let Some(pending) = self.connect.take()
            && matches!(result, ConnectPoll::Connected(_))
        {
            self.link = Some(pending.ssid);
        }
        result
    }

    fn begin_scan(&mut self) -> Result<(), Self::Error> {
        self.scan_ready_ms = Some(self.now_ms + SCAN_LATENCY_MS);
        Ok(())
    }

    fn poll_scan(&mut self, out: &mut ScanList) -> ScanPoll {
        let Some(ready_ms) = self.scan_ready_ms else {
            return ScanPoll::Failed;
        };
        if self.now_ms < ready_ms {
            return ScanPoll::Pending;
        }
        self.scan_ready_ms = None;

        out.clear();
        for network in &self.networks {
            if self.reachable(&network.ssid).is_none() {
                continue;
            }
            let Ok(identity) = NetworkIdentity::new(&network.ssid) else {
                continue;
            };
            let identity = identity
                .with_rssi(network.rssi_dbm)
                .with_security(network.security);
            if out.push(identity).is_err() {
                break;
            }
        }
        debug!("sim: scan found {} networks", out.len());
        ScanPoll::Complete
    }

    fn poll_link_lost(&mut self) -> Option<FailureReason> {
        self.link_lost.take()
    }

    fn disconnect(&mut self) {
        self.connect = None;
        self.link = None;
        self.link_lost = None;
    }
}
