//! Collaborators supplied by the embedding video backend.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

use crate::buffer::FifoBuffer;
use crate::status::FifoStatus;

/// Opcode decoder invoked once per command unit.
pub trait CommandDecoder: Send {
    /// Decodes whole commands from [`FifoBuffer::pending`], consuming the bytes it used, and
    /// returns the GPU cycles spent. Incomplete trailing commands must be left pending.
    fn decode(&mut self, fifo: &mut FifoBuffer, skip_frame: bool) -> u32;
}

/// Host services polled by the consumer loop.
pub trait VideoHost: Send {
    /// Pump host window messages.
    fn peek_messages(&mut self) {}

    /// Service requests other threads queued for the GPU thread (swaps, EFB peeks/pokes).
    fn check_async_requests(&mut self) {}

    /// Present whatever is current without waiting for the guest to finish a frame.
    fn light_swap(&mut self) {}

    fn publish_status(&mut self, _status: &FifoStatus) {}
}

/// A host that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVideoHost;

impl VideoHost for NullVideoHost {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FifoAlert {
    /// Unrecoverable: the host buffer could not fit a command unit.
    CapacityExceeded {
        size: usize,
        len: usize,
        read_offset: usize,
    },
    /// Unrecoverable: teardown requested while the GPU loop is running.
    ShutdownWhileActive,
    /// The read/write distance went negative; emulation continues.
    NegativeDistance { distance: i64 },
}

impl FifoAlert {
    fn kind_index(&self) -> usize {
        match self {
            FifoAlert::CapacityExceeded { .. } => 0,
            FifoAlert::ShutdownWhileActive => 1,
            FifoAlert::NegativeDistance { .. } => 2,
        }
    }
}

impl std::fmt::Display for FifoAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FifoAlert::CapacityExceeded {
                size,
                len,
                read_offset,
            } => write!(
                f,
                "FIFO out of bounds (size = {size}, len = {len} at read offset {read_offset})"
            ),
            FifoAlert::ShutdownWhileActive => write!(f, "FIFO shutting down while active"),
            FifoAlert::NegativeDistance { distance } => write!(
                f,
                "negative FIFO read/write distance = {distance}; this can produce instability"
            ),
        }
    }
}

/// Process-wide user-facing alert channel (message box, OSD, ...).
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &FifoAlert);
}

/// Alert sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, alert: &FifoAlert) {
        error!(%alert, "FIFO alert");
    }
}

/// Forwards each alert kind to the sink at most once per [`crate::Fifo`] lifetime.
pub(crate) struct AlertOnce {
    sink: Box<dyn AlertSink>,
    raised: [AtomicBool; 3],
}

impl AlertOnce {
    pub(crate) fn new(sink: Box<dyn AlertSink>) -> Self {
        Self {
            sink,
            raised: Default::default(),
        }
    }

    pub(crate) fn raise(&self, alert: FifoAlert) {
        if !self.raised[alert.kind_index()].swap(true, Ordering::AcqRel) {
            self.sink.alert(&alert);
        }
    }
}

impl std::fmt::Debug for AlertOnce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertOnce")
            .field("raised", &self.raised)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<FifoAlert>>>);

    impl AlertSink for Recorder {
        fn alert(&self, alert: &FifoAlert) {
            self.0.lock().unwrap().push(alert.clone());
        }
    }

    #[test]
    fn each_alert_kind_is_forwarded_once() {
        let rec = Recorder::default();
        let alerts = AlertOnce::new(Box::new(rec.clone()));
        alerts.raise(FifoAlert::NegativeDistance { distance: -32 });
        alerts.raise(FifoAlert::NegativeDistance { distance: -64 });
        alerts.raise(FifoAlert::ShutdownWhileActive);

        assert_eq!(
            *rec.0.lock().unwrap(),
            vec![
                FifoAlert::NegativeDistance { distance: -32 },
                FifoAlert::ShutdownWhileActive
            ]
        );
    }
}
