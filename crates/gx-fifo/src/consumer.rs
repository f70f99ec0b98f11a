use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::buffer::FifoBuffer;
use crate::clock::{HostClock, SystemClock};
use crate::config::FifoConfig;
use crate::error::{FifoError, Result};
use crate::flow::{FlowControl, COMMAND_UNIT_SIZE};
use crate::host::{AlertOnce, AlertSink, CommandDecoder, FifoAlert, LogAlertSink, VideoHost};
use crate::memory::CommandMemory;
use crate::snapshot::{FifoSnapshot, SnapshotError};
use crate::status::ConsumerState;

/// Owned lifecycle context shared (via `Arc`) by the CPU thread, the GPU thread and any
/// debugger/frontend thread.
///
/// The host-side [`FifoBuffer`] lives behind a coarse mutex. The GPU thread holds it for as long
/// as [`Fifo::run_gpu_loop`] runs and only lets go while the emulator is paused, which is how
/// [`Fifo::pause_and_lock`] gets exclusive access.
pub struct Fifo {
    config: FifoConfig,
    flow: FlowControl,
    memory: Arc<dyn CommandMemory>,
    clock: Arc<dyn HostClock>,
    buffer: Mutex<FifoBuffer>,

    gpu_running: AtomicBool,
    emu_running: AtomicBool,
    skip_current_frame: AtomicBool,
    state: AtomicU8,
    consumer_thread: Mutex<Option<ThreadId>>,

    /// GPU cycle budget granted by the CPU side (sync-GPU mode only).
    gpu_ticks: AtomicI64,
    clock_origin: AtomicI64,

    /// Clock time of the last frame presented, in nanoseconds. Drives the heartbeat deadline.
    last_presentation_ns: AtomicU64,

    alerts: AlertOnce,
}

impl std::fmt::Debug for Fifo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fifo")
            .field("config", &self.config)
            .field("flow", &self.flow)
            .field("state", &self.consumer_state())
            .finish_non_exhaustive()
    }
}

impl Fifo {
    /// Creates the context and allocates the host buffer (`initialize`).
    pub fn new(config: FifoConfig, memory: Arc<dyn CommandMemory>) -> Result<Self> {
        config.validate()?;
        let buffer = FifoBuffer::new(config.buffer_size);
        Ok(Self {
            config,
            flow: FlowControl::new(),
            memory,
            clock: Arc::new(SystemClock::new()),
            buffer: Mutex::new(buffer),
            gpu_running: AtomicBool::new(false),
            emu_running: AtomicBool::new(true),
            skip_current_frame: AtomicBool::new(false),
            state: AtomicU8::new(ConsumerState::Stopped as u8),
            consumer_thread: Mutex::new(None),
            gpu_ticks: AtomicI64::new(0),
            clock_origin: AtomicI64::new(0),
            last_presentation_ns: AtomicU64::new(0),
            alerts: AlertOnce::new(Box::new(LogAlertSink)),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn HostClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_alert_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.alerts = AlertOnce::new(sink);
        self
    }

    pub fn config(&self) -> &FifoConfig {
        &self.config
    }

    pub fn flow(&self) -> &FlowControl {
        &self.flow
    }

    pub fn memory(&self) -> &Arc<dyn CommandMemory> {
        &self.memory
    }

    pub fn consumer_state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_gpu_running(&self) -> bool {
        self.gpu_running.load(Ordering::SeqCst)
    }

    pub fn is_emulator_running(&self) -> bool {
        self.emu_running.load(Ordering::SeqCst)
    }

    /// Signals the GPU loop that emulation is (not) running. While not running the loop parks in
    /// its paused branch.
    pub fn set_emulator_running(&self, running: bool) {
        self.emu_running.store(running, Ordering::SeqCst);
    }

    pub fn set_rendering(&self, enabled: bool) {
        self.skip_current_frame.store(!enabled, Ordering::Release);
    }

    pub fn skip_current_frame(&self) -> bool {
        self.skip_current_frame.load(Ordering::Acquire)
    }

    pub fn gpu_ticks(&self) -> i64 {
        self.gpu_ticks.load(Ordering::Acquire)
    }

    /// Adds GPU cycle budget; used by the CPU timing code in sync-GPU mode.
    pub fn grant_ticks(&self, ticks: u32) {
        self.gpu_ticks.fetch_add(ticks as i64, Ordering::AcqRel);
    }

    pub fn set_clock_origin(&self, origin: i64) {
        self.clock_origin.store(origin, Ordering::Release);
    }

    /// Records that the renderer presented a frame, pushing back the next forced light swap.
    pub fn note_presentation(&self) {
        let now = u64::try_from(self.clock.now().as_nanos()).unwrap_or(u64::MAX);
        self.last_presentation_ns.store(now, Ordering::Release);
    }

    fn last_presentation(&self) -> Duration {
        Duration::from_nanos(self.last_presentation_ns.load(Ordering::Acquire))
    }

    fn reset_gpu_ticks(&self) {
        self.gpu_ticks
            .store(self.clock_origin.load(Ordering::Acquire), Ordering::Release);
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_buffer(&self) -> MutexGuard<'_, FifoBuffer> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_consumer_thread(&self) -> MutexGuard<'_, Option<ThreadId>> {
        match self.consumer_thread.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_consumer_thread(&self) -> bool {
        *self.lock_consumer_thread() == Some(thread::current().id())
    }

    /// (Re)allocates the host buffer and resets the GPU tick counter to its origin.
    pub fn initialize(&self) -> Result<()> {
        if self.is_gpu_running() {
            return Err(FifoError::LoopActive);
        }
        *self.lock_buffer() = FifoBuffer::new(self.config.buffer_size);
        self.reset_gpu_ticks();
        Ok(())
    }

    /// Frees the host buffer. Refused while the GPU loop is still flagged active.
    pub fn shutdown(&self) -> Result<()> {
        if self.is_gpu_running() {
            error!("FIFO shutting down while active");
            self.alerts.raise(FifoAlert::ShutdownWhileActive);
            return Err(FifoError::ShutdownWhileActive);
        }
        self.lock_buffer().release();
        debug!("FIFO buffer released");
        Ok(())
    }

    /// Empties the host buffer. Requires the loop to be paused or stopped.
    pub fn reset_video_buffer(&self) -> Result<()> {
        if self.is_consumer_thread() {
            return Err(FifoError::LoopActive);
        }
        let mut lock = self.pause_and_lock();
        if let Some(buffer) = lock.buffer_mut() {
            buffer.reset();
        }
        let resume = lock.was_running;
        lock.unlock(resume);
        Ok(())
    }

    /// Runs the GPU thread's main loop until [`Fifo::exit_gpu_loop`] is called or a fatal error
    /// occurs. Blocks the calling thread, which becomes the consumer thread.
    pub fn run_gpu_loop(
        &self,
        decoder: &mut dyn CommandDecoder,
        host: &mut dyn VideoHost,
    ) -> Result<()> {
        let mut guard = self.lock_buffer();
        if guard.capacity() == 0 {
            return Err(FifoError::NotInitialized);
        }

        *self.lock_consumer_thread() = Some(thread::current().id());
        self.gpu_running.store(true, Ordering::SeqCst);
        self.set_state(ConsumerState::Running);
        debug!("GPU loop started");

        let heartbeat = self.config.heartbeat_interval();
        let pause_poll = self.config.pause_poll_interval();
        self.note_presentation();
        let mut result = Ok(());

        while self.gpu_running.load(Ordering::SeqCst) {
            host.peek_messages();
            host.check_async_requests();

            let elapsed = self.clock.now().saturating_sub(self.last_presentation());
            if elapsed > heartbeat {
                trace!(elapsed_us = elapsed.as_micros() as u64, "forcing light swap");
                host.light_swap();
                self.note_presentation();
            }

            host.publish_status(&self.flow.status());
            self.reset_gpu_ticks();

            if let Err(err) = self.drain(&mut guard, decoder, Some(&mut *host), true) {
                result = Err(err);
                break;
            }

            if self.emu_running.load(Ordering::SeqCst) {
                std::hint::spin_loop();
                continue;
            }

            self.set_state(ConsumerState::PausedExternally);
            while !self.emu_running.load(Ordering::SeqCst) {
                host.peek_messages();
                host.check_async_requests();
                drop(guard);
                self.clock.sleep(pause_poll);
                guard = self.lock_buffer();
            }
            self.set_state(ConsumerState::Running);
        }

        self.flow.set_reading(false);
        self.gpu_running.store(false, Ordering::SeqCst);
        *self.lock_consumer_thread() = None;
        self.set_state(ConsumerState::Stopped);
        debug!("GPU loop stopped");
        result
    }

    /// Single-core mode: drains everything currently available on the caller's thread.
    pub fn run_single_core(&self, decoder: &mut dyn CommandDecoder) -> Result<()> {
        if self.is_gpu_running() {
            return Err(FifoError::LoopActive);
        }
        let mut guard = self.lock_buffer();
        if guard.capacity() == 0 {
            return Err(FifoError::NotInitialized);
        }
        let result = self.drain(&mut guard, decoder, None, false);
        self.flow.set_reading(false);
        result
    }

    /// Stops the GPU loop. Callable from any thread, including the GPU thread itself.
    ///
    /// Returns once no command unit is in flight.
    pub fn exit_gpu_loop(&self) {
        self.flow.set_read_enabled(false);
        if !self.is_consumer_thread() {
            while self.flow.is_reading() {
                self.clock.yield_now();
            }
        }
        self.gpu_running.store(false, Ordering::SeqCst);
        self.emu_running.store(true, Ordering::SeqCst);
    }

    /// Pauses emulation and, unless called from the GPU thread, waits for the in-flight unit to
    /// finish and takes exclusive ownership of the host buffer.
    pub fn pause_and_lock(&self) -> FifoLock<'_> {
        let was_running = self.emu_running.swap(false, Ordering::SeqCst);
        let guard = if self.is_consumer_thread() {
            None
        } else {
            while self.flow.is_reading() {
                self.clock.yield_now();
            }
            Some(self.lock_buffer())
        };
        FifoLock {
            fifo: self,
            guard,
            was_running,
        }
    }

    fn can_read(&self, threaded: bool) -> bool {
        (!threaded || self.gpu_running.load(Ordering::SeqCst))
            && !self.flow.interrupt_waiting()
            && self.flow.read_enabled()
            && self.flow.distance() > 0
            && !self.flow.at_breakpoint()
    }

    fn drain(
        &self,
        fifo: &mut FifoBuffer,
        decoder: &mut dyn CommandDecoder,
        mut host: Option<&mut dyn VideoHost>,
        threaded: bool,
    ) -> Result<()> {
        loop {
            // Raise the busy flag before re-checking the enables so a concurrent stop either sees
            // us busy or we see its cleared enable.
            self.flow.set_reading(true);
            if !self.can_read(threaded) {
                break;
            }
            self.flow
                .set_possible_waiting_set_draw_done(self.flow.link_enabled());

            if threaded
                && self.config.sync_gpu
                && self.gpu_ticks() <= self.clock_origin.load(Ordering::Acquire)
            {
                break;
            }

            let res = self.process_unit(fifo, decoder);
            self.flow.set_possible_waiting_set_draw_done(false);
            if let Err(err) = res {
                self.flow.set_reading(false);
                return Err(err);
            }

            if let Some(host) = host.as_deref_mut() {
                host.publish_status(&self.flow.status());
                host.check_async_requests();
            }
        }
        self.flow.set_reading(false);

        if self.flow.at_breakpoint() {
            if self.consumer_state() != ConsumerState::StalledAtBreakpoint {
                debug!(
                    read_pointer = self.flow.read_pointer(),
                    "GPU stalled at breakpoint"
                );
            }
            self.set_state(ConsumerState::StalledAtBreakpoint);
        } else if threaded {
            self.set_state(ConsumerState::Running);
        } else {
            self.set_state(ConsumerState::Stopped);
        }
        Ok(())
    }

    fn process_unit(&self, fifo: &mut FifoBuffer, decoder: &mut dyn CommandDecoder) -> Result<()> {
        let read_pointer = self.flow.read_pointer();
        let mut unit = [0u8; COMMAND_UNIT_SIZE as usize];
        self.memory.read(read_pointer, &mut unit);
        let next = self.flow.next_unit(read_pointer);

        if let Err(err) = fifo.append(&unit) {
            if let FifoError::CapacityExceeded {
                size,
                len,
                read_offset,
            } = err
            {
                self.alerts.raise(FifoAlert::CapacityExceeded {
                    size,
                    len,
                    read_offset,
                });
            }
            return Err(err);
        }

        let cycles = decoder.decode(fifo, self.skip_current_frame());
        if self.config.sync_gpu {
            let ticks = self.gpu_ticks();
            if ticks > cycles as i64 {
                self.gpu_ticks.fetch_sub(cycles as i64, Ordering::AcqRel);
            }
        }

        let distance = self.flow.publish_read(next);
        if distance < 0 {
            warn!(
                distance,
                read_pointer, "negative FIFO read/write distance in GPU loop"
            );
            self.alerts.raise(FifoAlert::NegativeDistance { distance });
        }
        if fifo.is_drained() {
            self.flow.publish_safe_read_pointer(next);
        }
        Ok(())
    }
}

/// Exclusive access obtained through [`Fifo::pause_and_lock`].
///
/// When taken on the GPU thread no buffer guard is held (the loop already owns it), so
/// [`FifoLock::buffer`] returns `None` there.
pub struct FifoLock<'a> {
    fifo: &'a Fifo,
    guard: Option<MutexGuard<'a, FifoBuffer>>,
    was_running: bool,
}

impl FifoLock<'_> {
    /// Whether the emulator was running when the lock was taken.
    pub fn was_running(&self) -> bool {
        self.was_running
    }

    pub fn buffer(&self) -> Option<&FifoBuffer> {
        self.guard.as_deref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut FifoBuffer> {
        self.guard.as_deref_mut()
    }

    pub fn save_state(&self) -> std::result::Result<Vec<u8>, SnapshotError> {
        let buffer = self.buffer().ok_or(SnapshotError::NotLocked)?;
        Ok(FifoSnapshot::capture(buffer, self.fifo.skip_current_frame()).encode())
    }

    pub fn load_state(&mut self, bytes: &[u8]) -> std::result::Result<(), SnapshotError> {
        let snapshot = FifoSnapshot::decode(bytes)?;
        let skip = snapshot.skip_current_frame;
        let buffer = self.buffer_mut().ok_or(SnapshotError::NotLocked)?;
        snapshot.restore(buffer)?;
        self.fifo.skip_current_frame.store(skip, Ordering::Release);
        Ok(())
    }

    /// Releases the buffer, optionally resuming emulation first.
    pub fn unlock(self, resume: bool) {
        if resume {
            self.fifo.set_emulator_running(true);
        }
        drop(self.guard);
    }
}
