use std::sync::Arc;

use tracing::trace;

use crate::consumer::Fifo;
use crate::error::{FifoError, Result};
use crate::flow::COMMAND_UNIT_SIZE;

const UNIT: usize = COMMAND_UNIT_SIZE as usize;

/// CPU-side gather pipe.
///
/// Arbitrary-length writes are staged and committed into command memory one whole unit at a
/// time, at the write pointer. A unit becomes visible to the consumer only after its bytes are
/// in memory, when the distance is bumped.
#[derive(Debug)]
pub struct Producer {
    fifo: Arc<Fifo>,
    pipe: Vec<u8>,
}

impl Producer {
    pub fn new(fifo: Arc<Fifo>) -> Self {
        Self {
            fifo,
            pipe: Vec::with_capacity(UNIT * 4),
        }
    }

    pub fn fifo(&self) -> &Arc<Fifo> {
        &self.fifo
    }

    /// Bytes staged but not yet committed.
    pub fn staged_len(&self) -> usize {
        self.pipe.len()
    }

    /// Stages `bytes` and commits every complete unit that fits in the window.
    ///
    /// Returns [`FifoError::WindowFull`] when units remain staged because the consumer has not
    /// caught up; nothing is dropped and a later [`Producer::commit`] picks them up.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.pipe.extend_from_slice(bytes);
        self.commit().map(|_| ())
    }

    /// Like [`Producer::write`] but yields until every complete unit is committed.
    pub fn write_spinning(&mut self, bytes: &[u8]) -> Result<()> {
        self.pipe.extend_from_slice(bytes);
        loop {
            match self.commit() {
                Ok(_) => return Ok(()),
                Err(FifoError::WindowFull { .. }) => std::thread::yield_now(),
                Err(err) => return Err(err),
            }
        }
    }

    /// Pads a trailing partial unit with zero bytes (NOPs) and commits everything.
    pub fn flush(&mut self) -> Result<()> {
        let rem = self.pipe.len() % UNIT;
        if rem != 0 {
            self.pipe.resize(self.pipe.len() + UNIT - rem, 0);
        }
        self.write_spinning(&[])
    }

    /// Commits staged whole units; returns how many were committed.
    pub fn commit(&mut self) -> Result<usize> {
        let flow = self.fifo.flow();
        let window = flow.window_len();
        let mut committed = 0;

        while self.pipe.len() - committed * UNIT >= UNIT {
            let pending = flow.distance();
            if pending + COMMAND_UNIT_SIZE as i64 > window as i64 {
                self.pipe.drain(..committed * UNIT);
                return Err(FifoError::WindowFull { pending, window });
            }
            let start = committed * UNIT;
            let write_pointer = flow.write_pointer();
            self.fifo
                .memory()
                .write(write_pointer, &self.pipe[start..start + UNIT]);
            flow.publish_write(flow.next_unit(write_pointer));
            committed += 1;
        }

        self.pipe.drain(..committed * UNIT);
        if committed > 0 {
            trace!(units = committed, write_pointer = flow.write_pointer(), "committed command units");
        }
        Ok(committed)
    }
}
