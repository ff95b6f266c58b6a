//! Adapters binding the connectivity engine to storage and to the tasks that
//! consume its status.

#![cfg_attr(not(test), no_std)]

pub mod network;
pub mod storage;
