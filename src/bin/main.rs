//! Host harness: replays connectivity scenarios against a simulated radio
//! and RAM-backed flash.
//!
//! `tidelink [scenario...]`, default all. `RUST_LOG` controls verbosity.

use std::{env, process::ExitCode};

use log::{error, info, warn};

use scenarios::{HomeNetwork, Scenario};

#[path = "main/scenarios.rs"]
mod scenarios;
#[path = "main/sim_driver.rs"]
mod sim_driver;

const TICK_MS: u64 = 500;
const DEFAULT_SSID: &str = "Tidelink-Home";
const DEFAULT_PASSWORD: &str = "harbour-lights";

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let home = HomeNetwork {
        ssid: env::var("TIDELINK_WIFI_SSID").unwrap_or_else(|_| DEFAULT_SSID.to_owned()),
        password: env::var("TIDELINK_WIFI_PASSWORD")
            .unwrap_or_else(|_| DEFAULT_PASSWORD.to_owned()),
    };

    let mut selected = Vec::new();
    for name in env::args().skip(1) {
        let Some(scenario) = Scenario::from_name(&name) else {
            error!(
                "unknown scenario {:?}; expected one of: {}",
                name,
                Scenario::ALL.map(Scenario::as_str).join(", ")
            );
            return ExitCode::from(2);
        };
        selected.push(scenario);
    }
    if selected.is_empty() {
        selected.extend(Scenario::ALL);
    }

    let mut failed = 0usize;
    for scenario in selected {
        info!("=== {} (home ssid={}) ===", scenario.as_str(), home.ssid);
        match scenario.run(&home) {
            Ok(status) if status == scenario.expected() => {
                info!("{}: ok ({})", scenario.as_str(), status.as_str());
            }
            Ok(status) => {
                warn!(
                    "{}: ended {} but expected {}",
                    scenario.as_str(),
                    status.as_str(),
                    scenario.expected().as_str()
                );
                failed += 1;
            }
            Err(err) => {
                error!("{}: setup failed: {:?}", scenario.as_str(), err);
                failed += 1;
            }
        }
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        error!("{} scenario(s) failed", failed);
        ExitCode::FAILURE
    }
}
