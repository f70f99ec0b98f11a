//! Flow-control registers shared between the CPU (producer) and GPU (consumer) threads.
//!
//! Every scalar has a single writer side:
//! - producer: `write_pointer`, `+distance`
//! - consumer: `read_pointer`, `safe_read_pointer`, `is_reading`, `-distance`
//! - owner/CPU: window, enable and breakpoint flags
//!
//! Readers tolerate stale values; the only ordering edge that matters is "unit bytes written to
//! command memory" happens-before "distance increment observed", which the producer publishes
//! with release and the consumer observes with acquire.

#[cfg(all(feature = "loom", test))]
use loom::sync::atomic::{AtomicBool, AtomicI64, AtomicU32};
#[cfg(not(all(feature = "loom", test)))]
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32};

use std::sync::atomic::Ordering;

use crate::error::{FifoError, Result};
use crate::status::FifoStatus;

/// Size of the unit the consumer pulls out of guest memory per step.
pub const COMMAND_UNIT_SIZE: u32 = 32;

#[derive(Debug)]
pub struct FlowControl {
    base: AtomicU32,
    /// Address of the last unit in the window (inclusive).
    end: AtomicU32,
    read_pointer: AtomicU32,
    write_pointer: AtomicU32,
    safe_read_pointer: AtomicU32,
    read_write_distance: AtomicI64,

    read_enabled: AtomicBool,
    breakpoint_enabled: AtomicBool,
    breakpoint: AtomicU32,
    link_enabled: AtomicBool,
    interrupt_waiting: AtomicBool,

    is_reading: AtomicBool,
    possible_waiting_set_draw_done: AtomicBool,
}

impl FlowControl {
    pub fn new() -> Self {
        Self {
            base: AtomicU32::new(0),
            end: AtomicU32::new(0),
            read_pointer: AtomicU32::new(0),
            write_pointer: AtomicU32::new(0),
            safe_read_pointer: AtomicU32::new(0),
            read_write_distance: AtomicI64::new(0),
            read_enabled: AtomicBool::new(false),
            breakpoint_enabled: AtomicBool::new(false),
            breakpoint: AtomicU32::new(0),
            link_enabled: AtomicBool::new(false),
            interrupt_waiting: AtomicBool::new(false),
            is_reading: AtomicBool::new(false),
            possible_waiting_set_draw_done: AtomicBool::new(false),
        }
    }

    /// Programs the command window `[base, end]` and rewinds every pointer to `base`.
    ///
    /// Both addresses must be unit aligned; `end` is the address of the last unit. Must not be
    /// called while either side is active.
    pub fn configure_window(&self, base: u32, end: u32) -> Result<()> {
        if base % COMMAND_UNIT_SIZE != 0 || end % COMMAND_UNIT_SIZE != 0 {
            return Err(FifoError::InvalidConfig(
                "FIFO window must be aligned to the command unit size",
            ));
        }
        if end < base {
            return Err(FifoError::InvalidConfig("FIFO window end precedes base"));
        }
        if (end - base).checked_add(COMMAND_UNIT_SIZE).is_none() {
            return Err(FifoError::InvalidConfig("FIFO window must be smaller than 4 GiB"));
        }
        self.base.store(base, Ordering::SeqCst);
        self.end.store(end, Ordering::SeqCst);
        self.read_pointer.store(base, Ordering::SeqCst);
        self.write_pointer.store(base, Ordering::SeqCst);
        self.safe_read_pointer.store(base, Ordering::SeqCst);
        self.read_write_distance.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn base(&self) -> u32 {
        self.base.load(Ordering::Acquire)
    }

    pub fn end(&self) -> u32 {
        self.end.load(Ordering::Acquire)
    }

    /// Window size in bytes.
    pub fn window_len(&self) -> u32 {
        self.end() - self.base() + COMMAND_UNIT_SIZE
    }

    /// Address of the unit following `addr`, wrapping from `end` back to `base`.
    pub fn next_unit(&self, addr: u32) -> u32 {
        if addr == self.end() {
            self.base()
        } else {
            addr.wrapping_add(COMMAND_UNIT_SIZE)
        }
    }

    pub fn read_pointer(&self) -> u32 {
        self.read_pointer.load(Ordering::Acquire)
    }

    /// Moves the read pointer from outside the consumer (e.g. a debugger stepping past a
    /// breakpoint). Only valid while the consumer is paused or stalled.
    pub fn set_read_pointer(&self, addr: u32) {
        self.read_pointer.store(addr, Ordering::Release);
    }

    pub fn write_pointer(&self) -> u32 {
        self.write_pointer.load(Ordering::Acquire)
    }

    pub fn safe_read_pointer(&self) -> u32 {
        self.safe_read_pointer.load(Ordering::Acquire)
    }

    /// Bytes committed by the producer and not yet consumed. Negative only after a
    /// synchronization anomaly.
    pub fn distance(&self) -> i64 {
        self.read_write_distance.load(Ordering::Acquire)
    }

    pub fn read_enabled(&self) -> bool {
        self.read_enabled.load(Ordering::SeqCst)
    }

    pub fn set_read_enabled(&self, enabled: bool) {
        self.read_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn breakpoint_enabled(&self) -> bool {
        self.breakpoint_enabled.load(Ordering::Acquire)
    }

    pub fn set_breakpoint_enabled(&self, enabled: bool) {
        self.breakpoint_enabled.store(enabled, Ordering::Release);
    }

    pub fn breakpoint(&self) -> u32 {
        self.breakpoint.load(Ordering::Acquire)
    }

    pub fn set_breakpoint(&self, addr: u32) {
        self.breakpoint.store(addr, Ordering::Release);
    }

    pub fn link_enabled(&self) -> bool {
        self.link_enabled.load(Ordering::Acquire)
    }

    pub fn set_link_enabled(&self, enabled: bool) {
        self.link_enabled.store(enabled, Ordering::Release);
    }

    pub fn interrupt_waiting(&self) -> bool {
        self.interrupt_waiting.load(Ordering::Acquire)
    }

    pub fn set_interrupt_waiting(&self, waiting: bool) {
        self.interrupt_waiting.store(waiting, Ordering::Release);
    }

    pub fn is_reading(&self) -> bool {
        self.is_reading.load(Ordering::SeqCst)
    }

    pub fn possible_waiting_set_draw_done(&self) -> bool {
        self.possible_waiting_set_draw_done.load(Ordering::Acquire)
    }

    pub fn at_breakpoint(&self) -> bool {
        self.breakpoint_enabled() && self.read_pointer() == self.breakpoint()
    }

    pub fn status(&self) -> FifoStatus {
        FifoStatus {
            base: self.base(),
            end: self.end(),
            read_pointer: self.read_pointer(),
            write_pointer: self.write_pointer(),
            safe_read_pointer: self.safe_read_pointer(),
            distance: self.distance(),
            read_enabled: self.read_enabled(),
            breakpoint_enabled: self.breakpoint_enabled(),
            breakpoint: self.breakpoint(),
            link_enabled: self.link_enabled(),
            is_reading: self.is_reading(),
            at_breakpoint: self.at_breakpoint(),
        }
    }

    // Producer side.

    pub(crate) fn publish_write(&self, next_write_pointer: u32) {
        self.write_pointer
            .store(next_write_pointer, Ordering::Release);
        self.read_write_distance
            .fetch_add(COMMAND_UNIT_SIZE as i64, Ordering::Release);
    }

    // Consumer side.

    pub(crate) fn set_reading(&self, reading: bool) {
        self.is_reading.store(reading, Ordering::SeqCst);
    }

    pub(crate) fn set_possible_waiting_set_draw_done(&self, waiting: bool) {
        self.possible_waiting_set_draw_done
            .store(waiting, Ordering::Release);
    }

    /// Publishes a consumed unit and returns the remaining distance.
    pub(crate) fn publish_read(&self, next_read_pointer: u32) -> i64 {
        self.read_pointer
            .store(next_read_pointer, Ordering::Release);
        self.read_write_distance
            .fetch_sub(COMMAND_UNIT_SIZE as i64, Ordering::AcqRel)
            - COMMAND_UNIT_SIZE as i64
    }

    pub(crate) fn publish_safe_read_pointer(&self, addr: u32) {
        self.safe_read_pointer.store(addr, Ordering::Release);
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;

    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn consumer_never_sees_distance_ahead_of_write_pointer() {
        loom::model(|| {
            let flow = Arc::new(FlowControl::new());
            flow.configure_window(0, 3 * COMMAND_UNIT_SIZE).unwrap();

            let producer = {
                let flow = flow.clone();
                thread::spawn(move || {
                    flow.publish_write(COMMAND_UNIT_SIZE);
                    flow.publish_write(2 * COMMAND_UNIT_SIZE);
                })
            };

            let distance = flow.distance();
            let write_pointer = flow.write_pointer();
            assert!(distance >= 0);
            // The pointer is stored before the distance is bumped.
            assert!(write_pointer as i64 >= distance);

            producer.join().unwrap();
            assert_eq!(flow.distance(), 2 * COMMAND_UNIT_SIZE as i64);
        });
    }
}
