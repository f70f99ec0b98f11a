//! GPU command FIFO front end.
//!
//! The emulated CPU writes graphics commands into a window of guest memory (`[base, end]`) and
//! bumps a shared read/write distance. An independently clocked GPU thread drains that window
//! one 32-byte command unit at a time, stages the bytes in a host-side [`FifoBuffer`] and hands
//! them to a [`CommandDecoder`].
//!
//! - [`FifoBuffer`]: bounded byte store with compaction on overflow
//! - [`FlowControl`]: lock-free pointers/flags shared by both sides
//! - [`Fifo`]: owned lifecycle context; runs the consumer loop and the pause/lock protocol
//! - [`Producer`]: CPU-side gather pipe that commits whole command units
//! - [`FifoSnapshot`]: save-state payload for the FIFO buffer
//!
//! Rendering, host windowing and the opcode decoder itself are supplied by the embedder through
//! the traits in [`host`].

mod buffer;
mod clock;
mod config;
mod consumer;
mod error;
mod flow;
pub mod host;
mod memory;
mod producer;
mod snapshot;
mod status;

pub use buffer::FifoBuffer;
pub use clock::{HostClock, SystemClock, VirtualClock};
pub use config::{FifoConfig, DEFAULT_FIFO_SIZE};
pub use consumer::{Fifo, FifoLock};
pub use error::{FifoError, Result};
pub use flow::{FlowControl, COMMAND_UNIT_SIZE};
pub use host::{AlertSink, CommandDecoder, FifoAlert, LogAlertSink, NullVideoHost, VideoHost};
pub use memory::{CommandMemory, CommandRam};
pub use producer::Producer;
pub use snapshot::{FifoSnapshot, SnapshotError};
pub use status::{ConsumerState, FifoStatus};

#[cfg(all(test, not(target_arch = "wasm32")))]
mod proptests;
