use core::str;

use heapless::{String, Vec};
use log::{debug, warn};

use super::{FINGERPRINT_CAPACITY, Fingerprint};
use crate::network::SSID_MAX_BYTES;

const COUNT_KEY: &str = "fp.count";
const ENTRY_KEYS: [&str; FINGERPRINT_CAPACITY] = ["fp.n0", "fp.n1", "fp.n2", "fp.n3"];

/// Persistent key-value capability backing the fingerprint.
pub trait KeyValueStore {
    type Error: core::fmt::Debug;

    /// Copies the value for `key` into `out` and returns its full stored
    /// length, which may exceed `out.len()`. `None` when the key is absent.
    fn read(&mut self, key: &str, out: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    /// Removing an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), Self::Error>;

    /// Applies `updates` in order. Backends that can commit several keys in
    /// one write override this; the default stops at the first error.
    fn apply(&mut self, updates: &[KvUpdate<'_>]) -> Result<(), Self::Error> {
        for update in updates {
            match *update {
                KvUpdate::Write { key, value } => self.write(key, value)?,
                KvUpdate::Remove { key } => self.remove(key)?,
            }
        }
        Ok(())
    }
}

/// One step of a [`KeyValueStore::apply`] batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KvUpdate<'a> {
    Write { key: &'a str, value: &'a [u8] },
    Remove { key: &'a str },
}

/// Loads and saves the location fingerprint.
///
/// Saving is journaled: the count drops to zero, entries are rewritten, then
/// the new count is committed. An interrupted save reads back as empty, never
/// as a count pointing past the valid entries. The steps go out as one
/// [`KeyValueStore::apply`] batch so flash backends commit them together.
#[derive(Debug)]
pub struct FingerprintStore<KV> {
    kv: KV,
}

impl<KV> FingerprintStore<KV>
where
    KV: KeyValueStore,
{
    pub const fn new(kv: KV) -> Self {
        Self { kv }
    }

    pub fn backend(&self) -> &KV {
        &self.kv
    }

    pub fn backend_mut(&mut self) -> &mut KV {
        &mut self.kv
    }

    pub fn into_inner(self) -> KV {
        self.kv
    }

    /// Never fails: absent or unreadable state is an empty fingerprint.
    pub fn load(&mut self) -> Fingerprint {
        match self.try_load() {
            Ok(fingerprint) => {
                debug!("fingerprint: loaded {} neighbours", fingerprint.len());
                fingerprint
            }
            Err(LoadFailure::Backend) => Fingerprint::new(),
            Err(LoadFailure::Corrupted) => {
                warn!("fingerprint: stored set corrupted; treating as empty");
                Fingerprint::new()
            }
        }
    }

    pub fn save(&mut self, fingerprint: &Fingerprint) -> Result<(), KV::Error> {
        let count = [fingerprint.len() as u8];
        let mut updates = [KvUpdate::Write {
            key: COUNT_KEY,
            value: &[0],
        }; FINGERPRINT_CAPACITY + 2];

        let mut ssids = fingerprint.iter();
        for (update, key) in updates[1..].iter_mut().zip(ENTRY_KEYS) {
            *update = match ssids.next() {
                Some(ssid) => KvUpdate::Write {
                    key,
                    value: ssid.as_bytes(),
                },
                None => KvUpdate::Remove { key },
            };
        }
        updates[FINGERPRINT_CAPACITY + 1] = KvUpdate::Write {
            key: COUNT_KEY,
            value: &count,
        };

        self.kv.apply(&updates)?;
        debug!("fingerprint: saved {} neighbours", fingerprint.len());
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), KV::Error> {
        let mut updates = [KvUpdate::Remove { key: COUNT_KEY }; FINGERPRINT_CAPACITY + 1];
        for (update, key) in updates[1..].iter_mut().zip(ENTRY_KEYS) {
            *update = KvUpdate::Remove { key };
        }
        self.kv.apply(&updates)
    }

    fn try_load(&mut self) -> Result<Fingerprint, LoadFailure> {
        let mut count_buf = [0u8; 1];
        let count = match self.kv.read(COUNT_KEY, &mut count_buf) {
            Ok(None) => return Ok(Fingerprint::new()),
            Ok(Some(1)) => count_buf[0] as usize,
            Ok(Some(_)) => return Err(LoadFailure::Corrupted),
            Err(err) => {
                warn!("fingerprint: count read failed: {:?}", err);
                return Err(LoadFailure::Backend);
            }
        };
        if count > FINGERPRINT_CAPACITY {
            return Err(LoadFailure::Corrupted);
        }

        let mut fingerprint = Fingerprint::new();
        for key in ENTRY_KEYS.iter().take(count) {
            let mut buf = [0u8; SSID_MAX_BYTES];
            let len = match self.kv.read(key, &mut buf) {
                Ok(Some(len)) if len <= SSID_MAX_BYTES => len,
                Ok(_) => return Err(LoadFailure::Corrupted),
                Err(err) => {
                    warn!("fingerprint: entry read failed: {:?}", err);
                    return Err(LoadFailure::Backend);
                }
            };
            let ssid = str::from_utf8(&buf[..len]).map_err(|_| LoadFailure::Corrupted)?;
            if !fingerprint.insert(ssid) {
                return Err(LoadFailure::Corrupted);
            }
        }
        Ok(fingerprint)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LoadFailure {
    Backend,
    Corrupted,
}

const MEMORY_KV_ENTRIES: usize = 16;
const MEMORY_KV_KEY_BYTES: usize = 16;
const MEMORY_KV_VALUE_BYTES: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryKvError {
    Full,
    KeyTooLong,
    ValueTooLong,
    /// Write refused by [`MemoryKvStore::fail_writes_after`].
    Injected,
}

/// Volatile key-value store, used when no flash is available and in tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryKvStore {
    entries: Vec<
        (
            String<MEMORY_KV_KEY_BYTES>,
            Vec<u8, MEMORY_KV_VALUE_BYTES>,
        ),
        MEMORY_KV_ENTRIES,
    >,
    writes_left: Option<u16>,
}

impl MemoryKvStore {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            writes_left: None,
        }
    }

    /// Lets `writes` more mutations succeed, then refuses the rest. Simulates
    /// power loss in the middle of a multi-key update.
    pub fn fail_writes_after(&mut self, writes: u16) {
        self.writes_left = Some(writes);
    }

    pub fn heal(&mut self) {
        self.writes_left = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn consume_write(&mut self) -> Result<(), MemoryKvError> {
        match self.writes_left.as_mut() {
            Some(0) => Err(MemoryKvError::Injected),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(stored, _)| stored.as_str() == key)
    }
}

impl KeyValueStore for MemoryKvStore {
    type Error = MemoryKvError;

    fn read(&mut self, key: &str, out: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let Some(index) = self.position(key) else {
            return Ok(None);
        };
        let value = &self.entries[index].1;
        let copied = value.len().min(out.len());
        out[..copied].copy_from_slice(&value[..copied]);
        Ok(Some(value.len()))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        let mut stored_value = Vec::new();
        stored_value
            .extend_from_slice(value)
            .map_err(|_| MemoryKvError::ValueTooLong)?;

        if let Some(index) = self.position(key) {
            self.consume_write()?;
            self.entries[index].1 = stored_value;
            return Ok(());
        }

        let mut stored_key = String::new();
        stored_key
            .push_str(key)
            .map_err(|_| MemoryKvError::KeyTooLong)?;
        if self.entries.is_full() {
            return Err(MemoryKvError::Full);
        }
        self.consume_write()?;
        self.entries
            .push((stored_key, stored_value))
            .map_err(|_| MemoryKvError::Full)
    }

    fn remove(&mut self, key: &str) -> Result<(), Self::Error> {
        let Some(index) = self.position(key) else {
            return Ok(());
        };
        self.consume_write()?;
        self.entries.swap_remove(index);
        Ok(())
    }
}
