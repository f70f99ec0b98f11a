use std::sync::{Mutex, MutexGuard};

use tracing::debug;

/// Guest memory that backs the command window.
///
/// Unmapped reads return all-ones (open bus) and unmapped writes are dropped, mirroring how the
/// rest of the emulator treats stray physical accesses.
pub trait CommandMemory: Send + Sync {
    fn read(&self, addr: u32, buf: &mut [u8]);
    fn write(&self, addr: u32, data: &[u8]);
}

/// A flat RAM region starting at a fixed guest address.
#[derive(Debug)]
pub struct CommandRam {
    base: u32,
    data: Mutex<Box<[u8]>>,
}

impl CommandRam {
    pub fn new(base: u32, len: usize) -> Self {
        Self {
            base,
            data: Mutex::new(vec![0u8; len].into_boxed_slice()),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn offset(&self, addr: u32, len: usize, mapped_len: usize) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        let end = off.checked_add(len)?;
        (end <= mapped_len).then_some(off)
    }
}

impl CommandMemory for CommandRam {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        let data = self.lock();
        match self.offset(addr, buf.len(), data.len()) {
            Some(off) => buf.copy_from_slice(&data[off..off + buf.len()]),
            None => {
                debug!(addr, len = buf.len(), "command memory read outside mapped range");
                buf.fill(0xFF);
            }
        }
    }

    fn write(&self, addr: u32, src: &[u8]) {
        let mut data = self.lock();
        match self.offset(addr, src.len(), data.len()) {
            Some(off) => data[off..off + src.len()].copy_from_slice(src),
            None => debug!(addr, len = src.len(), "command memory write outside mapped range"),
        }
    }
}
