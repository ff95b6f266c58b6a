use log::{debug, info, warn};
use tidelink_core::{
    engine::{ConnectionEngine, EngineConfig},
    fingerprint::FingerprintStore,
    network::{Credentials, IdentityError, NetworkIdentity},
    status::{ConnectivityStatus, StalenessPolicy},
};
use tidelink_platform::{
    network::ConnectivityHandle,
    storage::{FlashKvError, FlashKvStore, RamFlash, RamFlashError},
};

use super::{
    TICK_MS,
    sim_driver::{SimDriver, SimNetwork},
};

const FLASH_BYTES: usize = 4096;
const KV_SLOT_LEN: u32 = 2048;
const FETCH_INTERVAL_MS: u64 = 15 * 60 * 1_000;

type Flash = RamFlash<FLASH_BYTES>;
type Engine = ConnectionEngine<SimDriver, FlashKvStore<Flash>>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(super) enum ScenarioError {
    Storage(FlashKvError<RamFlashError>),
    Identity(IdentityError),
}

impl From<FlashKvError<RamFlashError>> for ScenarioError {
    fn from(err: FlashKvError<RamFlashError>) -> Self {
        Self::Storage(err)
    }
}

impl From<IdentityError> for ScenarioError {
    fn from(err: IdentityError) -> Self {
        Self::Identity(err)
    }
}

/// The network the device was configured for.
#[derive(Debug, Clone)]
pub(super) struct HomeNetwork {
    pub(super) ssid: String,
    pub(super) password: String,
}

impl HomeNetwork {
    fn target(&self, password: &str) -> Result<(NetworkIdentity, Credentials), ScenarioError> {
        Ok((NetworkIdentity::new(&self.ssid)?, Credentials::new(password)?))
    }

    fn neighbourhood(&self) -> Vec<SimNetwork> {
        vec![
            SimNetwork::wpa2(&self.ssid, &self.password, -48),
            SimNetwork::wpa2("Neighbour-2G", "unknown-1", -61),
            SimNetwork::wpa2("Neighbour-5G", "unknown-2", -67),
            SimNetwork::wpa2("Printer-Direct", "unknown-3", -74),
            SimNetwork::wpa2("Upstairs", "unknown-4", -80),
        ]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Scenario {
    FirstBoot,
    RouterReboot,
    Relocation,
    BadPassword,
}

impl Scenario {
    pub(super) const ALL: [Self; 4] = [
        Self::FirstBoot,
        Self::RouterReboot,
        Self::Relocation,
        Self::BadPassword,
    ];

    pub(super) fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scenario| scenario.as_str() == name)
    }

    pub(super) const fn as_str(self) -> &'static str {
        match self {
            Self::FirstBoot => "first-boot",
            Self::RouterReboot => "router-reboot",
            Self::Relocation => "relocation",
            Self::BadPassword => "bad-password",
        }
    }

    pub(super) const fn expected(self) -> ConnectivityStatus {
        match self {
            Self::FirstBoot | Self::BadPassword => ConnectivityStatus::ConfigPortalRequired,
            Self::RouterReboot | Self::Relocation => ConnectivityStatus::ConnectedFresh,
        }
    }

    /// Runs the scenario from a blank flash and returns the final status.
    pub(super) fn run(self, home: &HomeNetwork) -> Result<ConnectivityStatus, ScenarioError> {
        match self {
            Self::FirstBoot => first_boot(home),
            Self::RouterReboot => router_reboot(home),
            Self::Relocation => relocation(home),
            Self::BadPassword => bad_password(home),
        }
    }
}

/// Never-configured device whose router is nowhere in range.
fn first_boot(home: &HomeNetwork) -> Result<ConnectivityStatus, ScenarioError> {
    let world = vec![
        SimNetwork::wpa2("Cafe-Guest", "latte", -55),
        SimNetwork::wpa2("Neighbour-5G", "unknown-2", -70),
    ];
    let mut rig = Rig::boot(world, Flash::new(), Some(home.target(&home.password)?))?;
    rig.run_until(15 * 60 * 1_000, |rig| rig.portal_open());
    info!(
        "first-boot: {} attempts before configuration",
        rig.engine.driver().connect_calls()
    );
    Ok(rig.finish())
}

/// Router power-cycles for two minutes; the device rides it out.
fn router_reboot(home: &HomeNetwork) -> Result<ConnectivityStatus, ScenarioError> {
    let mut driver = SimDriver::new(home.neighbourhood());
    driver.schedule_outage(&home.ssid, 2 * 60 * 1_000, 2 * 60 * 1_000);
    let mut rig = Rig::with_driver(driver, Flash::new(), Some(home.target(&home.password)?))?;
    rig.run_for(10 * 60 * 1_000);
    Ok(rig.finish())
}

/// Configured at home, powered on in a hotel, then reconfigured there.
fn relocation(home: &HomeNetwork) -> Result<ConnectivityStatus, ScenarioError> {
    let target = home.target(&home.password)?;
    let mut rig = Rig::boot(home.neighbourhood(), Flash::new(), Some(target.clone()))?;
    rig.run_for(60 * 1_000);
    info!(
        "relocation: {} neighbours remembered",
        rig.engine.fingerprint().len()
    );

    let hotel = vec![
        SimNetwork::wpa2("Hotel-Lobby", "welcome123", -45),
        SimNetwork::wpa2("Hotel-Floor3", "staff-only", -60),
        SimNetwork::wpa2("Cafe-Next-Door", "latte", -72),
    ];
    let mut rig = rig.power_cycle(hotel, Some(target))?;
    rig.run_until(2 * 60 * 1_000, |rig| rig.portal_open());
    if !rig.handle.take_portal_request() {
        warn!("relocation: configuration was never requested");
        return Ok(rig.finish());
    }

    info!("relocation: user picks Hotel-Lobby in the portal");
    rig.engine.credentials_updated(
        NetworkIdentity::new("Hotel-Lobby")?,
        Credentials::new("welcome123")?,
    );
    rig.run_for(60 * 1_000);
    Ok(rig.finish())
}

/// Router present and strong, but the stored password is wrong.
fn bad_password(home: &HomeNetwork) -> Result<ConnectivityStatus, ScenarioError> {
    let target = home.target("definitely-not-it")?;
    let mut rig = Rig::boot(home.neighbourhood(), Flash::new(), Some(target))?;
    rig.run_until(15 * 60 * 1_000, |rig| rig.portal_open());
    Ok(rig.finish())
}

/// One simulated device: engine, flash, status handle and a data fetcher
/// that only tracks when it last succeeded.
struct Rig {
    engine: Engine,
    handle: ConnectivityHandle,
    now_ms: u64,
    last_fetch_ms: Option<u64>,
    shown: Option<ConnectivityStatus>,
}

impl Rig {
    fn boot(
        world: Vec<SimNetwork>,
        flash: Flash,
        target: Option<(NetworkIdentity, Credentials)>,
    ) -> Result<Self, ScenarioError> {
        Self::with_driver(SimDriver::new(world), flash, target)
    }

    fn with_driver(
        driver: SimDriver,
        flash: Flash,
        target: Option<(NetworkIdentity, Credentials)>,
    ) -> Result<Self, ScenarioError> {
        let kv = FlashKvStore::open(flash, 0, KV_SLOT_LEN)?;
        let engine = ConnectionEngine::new(
            driver,
            FingerprintStore::new(kv),
            EngineConfig::default(),
            target,
        );
        Ok(Self {
            engine,
            handle: ConnectivityHandle::new(),
            now_ms: 0,
            last_fetch_ms: None,
            shown: None,
        })
    }

    /// Keeps the flash contents, loses everything held in RAM.
    fn power_cycle(
        self,
        world: Vec<SimNetwork>,
        target: Option<(NetworkIdentity, Credentials)>,
    ) -> Result<Self, ScenarioError> {
        info!("--- power cycle ---");
        let (_, store) = self.engine.into_parts();
        let flash = store.into_inner().into_inner();
        Self::boot(world, flash, target)
    }

    fn portal_open(&self) -> bool {
        self.handle.snapshot().portal_requested
    }

    fn run_for(&mut self, duration_ms: u64) {
        let end_ms = self.now_ms + duration_ms;
        while self.now_ms < end_ms {
            self.step();
        }
    }

    fn run_until(&mut self, limit_ms: u64, done: impl Fn(&Self) -> bool) {
        let end_ms = self.now_ms + limit_ms;
        while self.now_ms < end_ms {
            self.step();
            if done(self) {
                return;
            }
        }
        warn!("condition not reached within {}ms", limit_ms);
    }

    fn step(&mut self) {
        let now_ms = self.now_ms;
        self.engine.driver_mut().set_time(now_ms);

        let result = self.engine.tick(now_ms);
        if self.handle.apply(result) {
            let snapshot = self.handle.snapshot();
            info!(
                "t={:>6.1}s status={} rev={} state={}",
                now_ms as f64 / 1_000.0,
                snapshot.status.as_str(),
                snapshot.revision,
                self.engine.state().as_str()
            );
            if let Some(reason) = self.engine.last_failure_reason() {
                info!("  last failure: {}", reason);
            }
        }

        self.fetch_if_due(now_ms);
        self.now_ms += TICK_MS;
    }

    fn fetch_if_due(&mut self, now_ms: u64) {
        let snapshot = self.handle.snapshot();
        if snapshot.status.is_connected() {
            let reconnected = self.engine.take_reconnected();
            let due = self
                .last_fetch_ms
                .is_none_or(|last| now_ms.saturating_sub(last) >= FETCH_INTERVAL_MS);
            if reconnected || due {
                debug!("fetch: payload refreshed (reconnected={})", reconnected);
                self.last_fetch_ms = Some(now_ms);
            }
        }

        let age_ms = self.last_fetch_ms.map(|last| now_ms.saturating_sub(last));
        let shown = snapshot.display_status(age_ms, StalenessPolicy::default());
        if self.shown != Some(shown) {
            debug!("indicator: {}", shown.as_str());
            self.shown = Some(shown);
        }
    }

    fn finish(self) -> ConnectivityStatus {
        let status = self.engine.current_status();
        info!(
            "final status={} attempts={} fingerprint={}",
            status.as_str(),
            self.engine.driver().connect_calls(),
            self.engine.fingerprint().len()
        );
        status
    }
}
