use embedded_storage::{ReadStorage, Storage};
use heapless::{String, Vec};
use log::{debug, info, warn};
use tidelink_core::fingerprint::{KeyValueStore, KvUpdate};

const KV_MAGIC: u32 = 0x314B_4C54; // "TLK1"
const KV_VERSION: u8 = 1;
const HEADER_LEN: usize = 12;
const CHECKSUM_LEN: usize = 4;

pub const KV_CAPACITY: usize = 16;
pub const KEY_MAX_BYTES: usize = 16;
pub const VALUE_MAX_BYTES: usize = 64;

/// Largest serialized record: header, every entry at full size, checksum.
pub const RECORD_MAX_LEN: usize =
    HEADER_LEN + KV_CAPACITY * (2 + KEY_MAX_BYTES + VALUE_MAX_BYTES) + CHECKSUM_LEN;

type Key = String<KEY_MAX_BYTES>;
type Value = Vec<u8, VALUE_MAX_BYTES>;
type Table = Vec<(Key, Value), KV_CAPACITY>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashKvError<E> {
    Flash(E),
    RegionTooSmall,
    Full,
    KeyTooLong,
    ValueTooLong,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Slot {
    A,
    B,
}

impl Slot {
    const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Key-value table journaled across two slots of a flash region.
///
/// Every write serializes the whole table into the slot that is not live,
/// tagged with the next sequence number. [`FlashKvStore::open`] keeps the
/// valid slot with the highest sequence, so a write torn by power loss
/// leaves the previous table readable. On NOR parts both slots should start
/// on a sector boundary.
#[derive(Debug)]
pub struct FlashKvStore<S> {
    flash: S,
    base: u32,
    slot_len: u32,
    live: Option<Slot>,
    sequence: u32,
    table: Table,
}

impl<S> FlashKvStore<S>
where
    S: Storage,
{
    /// Mounts the region `[base, base + 2 * slot_len)`. Blank or corrupt slots
    /// read as an empty table.
    pub fn open(mut flash: S, base: u32, slot_len: u32) -> Result<Self, FlashKvError<S::Error>> {
        let region_end = u64::from(base) + 2 * u64::from(slot_len);
        if (slot_len as usize) < RECORD_MAX_LEN || region_end > flash.capacity() as u64 {
            return Err(FlashKvError::RegionTooSmall);
        }

        let mut buf = [0u8; RECORD_MAX_LEN];
        let mut best: Option<(Slot, u32, Table)> = None;
        for slot in [Slot::A, Slot::B] {
            flash
                .read(slot_offset(base, slot_len, slot), &mut buf)
                .map_err(FlashKvError::Flash)?;
            let Some((sequence, table)) = decode_record(&buf) else {
                debug!("kv: slot {:?} blank or invalid", slot);
                continue;
            };
            if best
                .as_ref()
                .is_none_or(|(_, best_sequence, _)| sequence > *best_sequence)
            {
                best = Some((slot, sequence, table));
            }
        }

        let (live, sequence, table) = match best {
            Some((slot, sequence, table)) => {
                info!(
                    "kv: mounted slot {:?} seq={} entries={}",
                    slot,
                    sequence,
                    table.len()
                );
                (Some(slot), sequence, table)
            }
            None => {
                info!("kv: no valid record; starting empty");
                (None, 0, Table::new())
            }
        };

        Ok(Self {
            flash,
            base,
            slot_len,
            live,
            sequence,
            table,
        })
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn flash(&self) -> &S {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut S {
        &mut self.flash
    }

    pub fn into_inner(self) -> S {
        self.flash
    }

    /// Writes `next` to the spare slot and adopts it only once the flash
    /// write succeeded.
    fn commit(&mut self, next: Table) -> Result<(), FlashKvError<S::Error>> {
        let target = self.live.map_or(Slot::A, Slot::other);
        let sequence = self.sequence.wrapping_add(1);

        let mut buf = [0xFFu8; RECORD_MAX_LEN];
        let len = encode_record(sequence, &next, &mut buf);
        self.flash
            .write(slot_offset(self.base, self.slot_len, target), &buf[..len])
            .map_err(FlashKvError::Flash)?;

        debug!("kv: committed slot {:?} seq={} len={}", target, sequence, len);
        self.live = Some(target);
        self.sequence = sequence;
        self.table = next;
        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|(stored, _)| stored.as_str() == key)
    }
}

impl<S> KeyValueStore for FlashKvStore<S>
where
    S: Storage,
    S::Error: core::fmt::Debug,
{
    type Error = FlashKvError<S::Error>;

    fn read(&mut self, key: &str, out: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let Some(index) = self.position(key) else {
            return Ok(None);
        };
        let value = &self.table[index].1;
        let copied = value.len().min(out.len());
        out[..copied].copy_from_slice(&value[..copied]);
        Ok(Some(value.len()))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        self.apply(&[KvUpdate::Write { key, value }])
    }

    fn remove(&mut self, key: &str) -> Result<(), Self::Error> {
        self.apply(&[KvUpdate::Remove { key }])
    }

    /// Stages every update on a copy of the table and commits once. A batch
    /// that changes nothing does not touch flash.
    fn apply(&mut self, updates: &[KvUpdate<'_>]) -> Result<(), Self::Error> {
        let mut next = self.table.clone();
        for update in updates {
            stage(&mut next, *update)?;
        }
        if next == self.table {
            return Ok(());
        }
        self.commit(next)
    }
}

fn stage<E>(table: &mut Table, update: KvUpdate<'_>) -> Result<(), FlashKvError<E>> {
    match update {
        KvUpdate::Write { key, value } => {
            let mut stored_value = Value::new();
            stored_value
                .extend_from_slice(value)
                .map_err(|_| FlashKvError::ValueTooLong)?;
            if let Some((_, existing)) = table
                .iter_mut()
                .find(|(stored, _)| stored.as_str() == key)
            {
                *existing = stored_value;
                return Ok(());
            }
            let mut stored_key = Key::new();
            stored_key
                .push_str(key)
                .map_err(|_| FlashKvError::KeyTooLong)?;
            table
                .push((stored_key, stored_value))
                .map_err(|_| FlashKvError::Full)
        }
        KvUpdate::Remove { key } => {
            if let Some(index) = table.iter().position(|(stored, _)| stored.as_str() == key) {
                table.remove(index);
            }
            Ok(())
        }
    }
}

fn slot_offset(base: u32, slot_len: u32, slot: Slot) -> u32 {
    match slot {
        Slot::A => base,
        Slot::B => base + slot_len,
    }
}

// Layout: magic u32 | version u8 | entries u8 | payload len u16 | sequence u32
// | payload | fnv1a u32 over everything before it. Entries are
// key len u8, key, value len u8, value.
fn encode_record(sequence: u32, table: &Table, buf: &mut [u8; RECORD_MAX_LEN]) -> usize {
    let mut cursor = HEADER_LEN;
    for (key, value) in table {
        buf[cursor] = key.len() as u8;
        cursor += 1;
        buf[cursor..cursor + key.len()].copy_from_slice(key.as_bytes());
        cursor += key.len();
        buf[cursor] = value.len() as u8;
        cursor += 1;
        buf[cursor..cursor + value.len()].copy_from_slice(value);
        cursor += value.len();
    }

    let payload_len = (cursor - HEADER_LEN) as u16;
    buf[0..4].copy_from_slice(&KV_MAGIC.to_le_bytes());
    buf[4] = KV_VERSION;
    buf[5] = table.len() as u8;
    buf[6..8].copy_from_slice(&payload_len.to_le_bytes());
    buf[8..12].copy_from_slice(&sequence.to_le_bytes());

    let checksum = checksum32(&buf[..cursor]);
    buf[cursor..cursor + CHECKSUM_LEN].copy_from_slice(&checksum.to_le_bytes());
    cursor + CHECKSUM_LEN
}

fn decode_record(buf: &[u8; RECORD_MAX_LEN]) -> Option<(u32, Table)> {
    if buf[..HEADER_LEN].iter().all(|b| *b == 0xFF) {
        return None;
    }

    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != KV_MAGIC {
        return None;
    }
    if buf[4] != KV_VERSION {
        warn!("kv: unsupported record version {}", buf[4]);
        return None;
    }

    let entries = buf[5] as usize;
    let payload_len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    let sequence = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let end = HEADER_LEN + payload_len;
    if entries > KV_CAPACITY || end + CHECKSUM_LEN > RECORD_MAX_LEN {
        return None;
    }

    let expected = u32::from_le_bytes([buf[end], buf[end + 1], buf[end + 2], buf[end + 3]]);
    if checksum32(&buf[..end]) != expected {
        warn!("kv: checksum mismatch seq={}", sequence);
        return None;
    }

    let mut table = Table::new();
    let mut cursor = HEADER_LEN;
    for _ in 0..entries {
        let key_len = *buf.get(cursor)? as usize;
        let key_bytes = buf.get(cursor + 1..cursor + 1 + key_len)?;
        cursor += 1 + key_len;
        let value_len = *buf.get(cursor)? as usize;
        let value_bytes = buf.get(cursor + 1..cursor + 1 + value_len)?;
        cursor += 1 + value_len;
        if cursor > end {
            return None;
        }

        let mut key = Key::new();
        key.push_str(core::str::from_utf8(key_bytes).ok()?).ok()?;
        let value = Value::from_slice(value_bytes).ok()?;
        table.push((key, value)).ok()?;
    }

    (cursor == end).then_some((sequence, table))
}

fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
