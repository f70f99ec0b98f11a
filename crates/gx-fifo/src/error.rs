use thiserror::Error;

pub type Result<T> = std::result::Result<T, FifoError>;

/// Errors surfaced by the FIFO engine.
///
/// [`FifoError::CapacityExceeded`] and [`FifoError::ShutdownWhileActive`] are fatal for the
/// emulated machine; callers are expected to stop emulation when they see them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FifoError {
    /// The producer outran the consumer by more than the buffer can hold, even after the
    /// consumed prefix was compacted away.
    #[error("FIFO out of bounds (size = {size}, len = {len} at read offset {read_offset})")]
    CapacityExceeded {
        size: usize,
        len: usize,
        read_offset: usize,
    },

    #[error("FIFO shutting down while the GPU loop is active")]
    ShutdownWhileActive,

    #[error("FIFO buffer is not allocated")]
    NotInitialized,

    /// The operation needs exclusive use of the FIFO but the GPU loop owns it.
    #[error("GPU loop is running")]
    LoopActive,

    /// The command window has no room for another unit; retry after the consumer drains.
    #[error("command window full (pending = {pending} bytes, window = {window} bytes)")]
    WindowFull { pending: i64, window: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
