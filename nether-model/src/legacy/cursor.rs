//! Forward-only reader over the legacy binary payload.

use bytemuck::Pod;

#[derive(Debug, Clone)]
pub struct BinaryCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BinaryCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// An exhausted cursor; every read fails.
    pub fn empty() -> Self {
        Self::new(&[])
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_array::<u32>(1).and_then(|v| v.first().copied())
    }

    /// Read `count` little-endian elements.
    ///
    /// Fails without consuming anything when fewer than
    /// `count * size_of::<T>()` bytes remain.
    pub fn read_array<T: Pod>(&mut self, count: usize) -> Option<Vec<T>> {
        let size = size_of::<T>();
        let len = count.checked_mul(size)?;
        let end = self.offset.checked_add(len)?;
        let bytes = self.data.get(self.offset..end)?;
        self.offset = end;
        Some(
            bytes
                .chunks_exact(size)
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        )
    }
}
