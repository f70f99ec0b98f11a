use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FifoError, Result};
use crate::flow::COMMAND_UNIT_SIZE;

/// Host-side FIFO buffer size (2 MiB).
pub const DEFAULT_FIFO_SIZE: usize = 2 * 1024 * 1024;

/// Force a light presentation if nothing was presented for this long (one 75 Hz frame).
const DEFAULT_HEARTBEAT_INTERVAL_US: u64 = 1_000_000 / 75;

const DEFAULT_PAUSE_POLL_INTERVAL_US: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FifoConfig {
    /// Capacity of the host-side [`crate::FifoBuffer`] in bytes.
    pub buffer_size: usize,
    /// Pace the GPU against the CPU-granted tick budget instead of running freely.
    pub sync_gpu: bool,
    pub heartbeat_interval_us: u64,
    /// Sleep between resume polls while the emulator is paused.
    pub pause_poll_interval_us: u64,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_FIFO_SIZE,
            sync_gpu: false,
            heartbeat_interval_us: DEFAULT_HEARTBEAT_INTERVAL_US,
            pause_poll_interval_us: DEFAULT_PAUSE_POLL_INTERVAL_US,
        }
    }
}

impl FifoConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_micros(self.heartbeat_interval_us)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_micros(self.pause_poll_interval_us)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < COMMAND_UNIT_SIZE as usize {
            return Err(FifoError::InvalidConfig(
                "buffer_size must hold at least one command unit",
            ));
        }
        if self.heartbeat_interval_us == 0 {
            return Err(FifoError::InvalidConfig("heartbeat_interval_us must be > 0"));
        }
        Ok(())
    }
}
