//! Persistent storage adapters.

mod flash_kv;
mod ram;

pub use flash_kv::{
    FlashKvError, FlashKvStore, KEY_MAX_BYTES, KV_CAPACITY, RECORD_MAX_LEN, VALUE_MAX_BYTES,
};
pub use ram::{RamFlash, RamFlashError};
