use std::io::{Cursor, Read};

use thiserror::Error;

use crate::buffer::FifoBuffer;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt FIFO snapshot: {0}")]
    Corrupt(&'static str),

    #[error("unsupported FIFO snapshot version {0}")]
    UnsupportedVersion(u16),

    #[error("FIFO snapshot capacity mismatch (expected {expected} bytes, found {found})")]
    CapacityMismatch { expected: usize, found: usize },

    /// Save/restore attempted on the GPU thread, which does not own the buffer guard.
    #[error("FIFO buffer is not locked by this thread")]
    NotLocked,
}

const MAGIC: [u8; 4] = *b"GXFF";

fn read_u8<R: Read>(r: &mut R) -> Result<u8, SnapshotError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_bool<R: Read>(r: &mut R) -> Result<bool, SnapshotError> {
    match read_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(SnapshotError::Corrupt("invalid bool")),
    }
}

fn read_u16_le<R: Read>(r: &mut R) -> Result<u16, SnapshotError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(r: &mut R) -> Result<u32, SnapshotError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Save-state payload for the host FIFO buffer.
///
/// The whole backing store is saved (not just the pending bytes) so a restore reproduces the
/// buffer bit for bit. The read cursor is stored as an offset from the buffer start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoSnapshot {
    pub buffer: Vec<u8>,
    pub size: u32,
    pub read_offset: u32,
    pub skip_current_frame: bool,
}

impl FifoSnapshot {
    pub const VERSION: u16 = 1;

    pub fn capture(buffer: &FifoBuffer, skip_current_frame: bool) -> Self {
        Self {
            buffer: buffer.raw().to_vec(),
            size: buffer.len() as u32,
            read_offset: buffer.read_offset() as u32,
            skip_current_frame,
        }
    }

    /// Writes the saved contents back. The target must have the same capacity.
    pub fn restore(&self, buffer: &mut FifoBuffer) -> Result<(), SnapshotError> {
        if self.buffer.len() != buffer.capacity() {
            return Err(SnapshotError::CapacityMismatch {
                expected: buffer.capacity(),
                found: self.buffer.len(),
            });
        }
        if self.size as usize > self.buffer.len() {
            return Err(SnapshotError::Corrupt("size exceeds capacity"));
        }
        if self.read_offset > self.size {
            return Err(SnapshotError::Corrupt("read offset past size"));
        }
        buffer.restore_raw(
            &self.buffer,
            self.size as usize,
            self.read_offset as usize,
        );
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 2 + 4 + self.buffer.len() + 4 + 4 + 1);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&Self::VERSION.to_le_bytes());
        out.extend_from_slice(&(self.buffer.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.buffer);
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.read_offset.to_le_bytes());
        out.push(u8::from(self.skip_current_frame));
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut r = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(SnapshotError::Corrupt("bad magic"));
        }
        let version = read_u16_le(&mut r)?;
        if version != Self::VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let capacity = read_u32_le(&mut r)? as usize;
        let remaining = bytes.len().saturating_sub(r.position() as usize);
        if capacity > remaining {
            return Err(SnapshotError::Corrupt("buffer length exceeds payload"));
        }
        let mut buffer = vec![0u8; capacity];
        r.read_exact(&mut buffer)?;

        let size = read_u32_le(&mut r)?;
        let read_offset = read_u32_le(&mut r)?;
        if size as usize > capacity {
            return Err(SnapshotError::Corrupt("size exceeds capacity"));
        }
        if read_offset > size {
            return Err(SnapshotError::Corrupt("read offset past size"));
        }
        let skip_current_frame = read_bool(&mut r)?;

        if (r.position() as usize) != bytes.len() {
            return Err(SnapshotError::Corrupt("trailing bytes"));
        }

        Ok(Self {
            buffer,
            size,
            read_offset,
            skip_current_frame,
        })
    }
}
