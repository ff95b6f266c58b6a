use embedded_storage::{ReadStorage, Storage};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RamFlashError {
    OutOfBounds,
    /// Injected power loss; only part of the write landed.
    Torn,
}

/// RAM-backed flash for host runs and tests. Starts erased (all `0xFF`).
#[derive(Debug)]
pub struct RamFlash<const N: usize> {
    bytes: [u8; N],
    tear_after: Option<usize>,
    writes: u32,
}

impl<const N: usize> RamFlash<N> {
    pub const fn new() -> Self {
        Self {
            bytes: [0xFF; N],
            tear_after: None,
            writes: 0,
        }
    }

    /// The next write stores only its first `bytes` bytes and fails.
    pub fn tear_next_write(&mut self, bytes: usize) {
        self.tear_after = Some(bytes);
    }

    pub fn writes(&self) -> u32 {
        self.writes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, RamFlashError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(RamFlashError::OutOfBounds)?;
        if end > N {
            return Err(RamFlashError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl<const N: usize> Default for RamFlash<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ReadStorage for RamFlash<N> {
    type Error = RamFlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Storage for RamFlash<N> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        self.writes = self.writes.saturating_add(1);

        if let Some(limit) = self.tear_after.take() {
            let landed = limit.min(bytes.len());
            let start = range.start;
            self.bytes[start..start + landed].copy_from_slice(&bytes[..landed]);
            return Err(RamFlashError::Torn);
        }

        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }
}
