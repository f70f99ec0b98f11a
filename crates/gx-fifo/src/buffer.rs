use tracing::{debug, error};

use crate::error::{FifoError, Result};

/// Host-side staging buffer for command bytes that have been pulled out of guest memory but not
/// yet consumed by the decoder.
///
/// Layout: `[0, read_offset)` is consumed, `[read_offset, size)` is pending, `[size, capacity)`
/// is free. When an append does not fit, the pending region is moved down to offset 0.
#[derive(Debug, Clone)]
pub struct FifoBuffer {
    storage: Box<[u8]>,
    size: usize,
    read_offset: usize,
}

impl FifoBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            size: 0,
            read_offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of bytes written into the buffer, consumed or not.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    /// True once the decoder has consumed everything that was appended.
    pub fn is_drained(&self) -> bool {
        self.read_offset == self.size
    }

    /// Bytes appended but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.storage[self.read_offset..self.size]
    }

    /// Marks `len` pending bytes as consumed. Clamped to the pending length.
    pub fn consume(&mut self, len: usize) {
        let pending = self.size - self.read_offset;
        debug_assert!(len <= pending, "consumed {len} bytes with only {pending} pending");
        self.read_offset += len.min(pending);
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let len = data.len();
        if self.size + len > self.capacity() {
            self.compact();
            if self.size + len > self.capacity() {
                error!(
                    size = self.size,
                    len,
                    capacity = self.capacity(),
                    "FIFO out of bounds after compaction"
                );
                return Err(FifoError::CapacityExceeded {
                    size: self.size,
                    len,
                    read_offset: self.read_offset,
                });
            }
        }

        self.storage[self.size..self.size + len].copy_from_slice(data);
        self.size += len;
        Ok(())
    }

    /// Drops the consumed prefix by moving the pending bytes to the start of the buffer.
    fn compact(&mut self) {
        let pos = self.read_offset;
        if pos == 0 {
            return;
        }
        debug!(consumed = pos, pending = self.size - pos, "compacting FIFO buffer");
        self.storage.copy_within(pos..self.size, 0);
        self.size -= pos;
        self.read_offset = 0;
    }

    pub fn reset(&mut self) {
        self.size = 0;
        self.read_offset = 0;
    }

    /// Frees the backing storage. The buffer has zero capacity afterwards.
    pub(crate) fn release(&mut self) {
        self.storage = Box::default();
        self.reset();
    }

    /// The whole backing store, including consumed and free bytes.
    pub(crate) fn raw(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn restore_raw(&mut self, storage: &[u8], size: usize, read_offset: usize) {
        debug_assert_eq!(storage.len(), self.capacity());
        debug_assert!(read_offset <= size && size <= storage.len());
        self.storage.copy_from_slice(storage);
        self.size = size;
        self.read_offset = read_offset;
    }
}
