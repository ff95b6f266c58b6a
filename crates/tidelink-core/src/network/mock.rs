use core::net::Ipv4Addr;

use heapless::Deque;

use super::{
    ConnectPoll, Credentials, FailureReason, NetworkDriver, NetworkIdentity, ScanList, ScanPoll,
};

const PLAN_CAPACITY: usize = 16;
const MOCK_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

/// Outcome of one scripted connection attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MockConnect {
    Succeed,
    Fail(FailureReason),
    /// Never completes; the engine has to time the attempt out.
    Hang,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MockScan {
    Results,
    Fail,
}

/// Scripted radio used for bring-up and tests.
///
/// Attempts consume the connect plan in order and fall back to the default
/// outcome once it is empty. Each attempt and scan stays pending for
/// `pending_polls` polls before resolving.
#[derive(Debug)]
pub struct MockDriver {
    plan: Deque<MockConnect, PLAN_CAPACITY>,
    default_connect: MockConnect,
    pending_polls: u8,
    in_flight: Option<(MockConnect, u8)>,
    scan: ScanList,
    scan_mode: MockScan,
    scan_in_flight: Option<u8>,
    link_lost: Option<FailureReason>,
    last_target: Option<NetworkIdentity>,
    connect_calls: u32,
    scan_calls: u32,
    disconnect_calls: u32,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            plan: Deque::new(),
            default_connect: MockConnect::Succeed,
            pending_polls: 0,
            in_flight: None,
            scan: ScanList::new(),
            scan_mode: MockScan::Results,
            scan_in_flight: None,
            link_lost: None,
            last_target: None,
            connect_calls: 0,
            scan_calls: 0,
            disconnect_calls: 0,
        }
    }

    pub fn with_pending_polls(mut self, polls: u8) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn set_default_connect(&mut self, outcome: MockConnect) {
        self.default_connect = outcome;
    }

    /// Returns `false` when the plan is full.
    pub fn push_connect(&mut self, outcome: MockConnect) -> bool {
        self.plan.push_back(outcome).is_ok()
    }

    /// Replaces the visible networks. Entries beyond scan capacity are dropped.
    pub fn set_visible(&mut self, networks: &[(&str, i8)]) {
        self.scan.clear();
        self.scan_mode = MockScan::Results;
        for (ssid, rssi) in networks {
            let Ok(identity) = NetworkIdentity::new(ssid) else {
                continue;
            };
            if self.scan.push(identity.with_rssi(*rssi)).is_err() {
                break;
            }
        }
    }

    pub fn push_visible(&mut self, identity: NetworkIdentity) -> bool {
        self.scan_mode = MockScan::Results;
        self.scan.push(identity).is_ok()
    }

    pub fn fail_scans(&mut self) {
        self.scan_mode = MockScan::Fail;
    }

    pub fn drop_link(&mut self, reason: FailureReason) {
        self.link_lost = Some(reason);
    }

    pub fn last_target(&self) -> Option<&NetworkIdentity> {
        self.last_target.as_ref()
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls
    }

    pub fn scan_calls(&self) -> u32 {
        self.scan_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkDriver for MockDriver {
    type Error = core::convert::Infallible;

    fn begin_connect(
        &mut self,
        target: &NetworkIdentity,
        _credentials: &Credentials,
    ) -> Result<(), Self::Error> {
        let outcome = self.plan.pop_front().unwrap_or(self.default_connect);
        self.in_flight = Some((outcome, self.pending_polls));
        self.last_target = Some(target.clone());
        self.connect_calls = self.connect_calls.saturating_add(1);
        Ok(())
    }

    fn poll_connect(&mut self) -> ConnectPoll {
        let Some((outcome, remaining)) = self.in_flight else {
            return ConnectPoll::Pending;
        };

        if outcome == MockConnect::Hang {
            return ConnectPoll::Pending;
        }
        if remaining > 0 {
            self.in_flight = Some((outcome, remaining - 1));
            return ConnectPoll::Pending;
        }

        self.in_flight = None;
        match outcome {
            MockConnect::Succeed => ConnectPoll::Connected(MOCK_ADDRESS),
            MockConnect::Fail(reason) => ConnectPoll::Failed(reason),
            MockConnect::Hang => ConnectPoll::Pending,
        }
    }

    fn begin_scan(&mut self) -> Result<(), Self::Error> {
        self.scan_in_flight = Some(self.pending_polls);
        self.scan_calls = self.scan_calls.saturating_add(1);
        Ok(())
    }

    fn poll_scan(&mut self, out: &mut ScanList) -> ScanPoll {
        let Some(remaining) = self.scan_in_flight else {
            return ScanPoll::Failed;
        };
        if remaining > 0 {
            self.scan_in_flight = Some(remaining - 1);
            return ScanPoll::Pending;
        }

        self.scan_in_flight = None;
        match self.scan_mode {
            MockScan::Results => {
                out.clone_from(&self.scan);
                ScanPoll::Complete
            }
            MockScan::Fail => ScanPoll::Failed,
        }
    }

    fn poll_link_lost(&mut self) -> Option<FailureReason> {
        self.link_lost.take()
    }

    fn disconnect(&mut self) {
        self.in_flight = None;
        self.disconnect_calls = self.disconnect_calls.saturating_add(1);
    }
}
