//! Connectivity resilience engine for an ambient display client.
//!
//! The engine is driven by [`engine::ConnectionEngine::tick`] from a
//! cooperative scheduler. It never blocks: connection attempts and scans are
//! started on the network driver and polled on later ticks.

#![cfg_attr(not(test), no_std)]

pub mod diagnostics;
pub mod engine;
pub mod fingerprint;
pub mod network;
pub mod retry;
pub mod status;
