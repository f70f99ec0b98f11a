#![cfg(not(target_arch = "wasm32"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gx_fifo::{
    AlertSink, CommandDecoder, CommandRam, ConsumerState, Fifo, FifoAlert, FifoBuffer,
    FifoConfig, FifoError, FifoStatus, NullVideoHost, Producer, VideoHost, VirtualClock,
    COMMAND_UNIT_SIZE,
};

const BASE: u32 = 0x0020_0000;
const UNIT: usize = COMMAND_UNIT_SIZE as usize;

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn new_fifo(units: u32, config: FifoConfig) -> Arc<Fifo> {
    let ram = Arc::new(CommandRam::new(BASE, (units * COMMAND_UNIT_SIZE) as usize));
    let fifo = Fifo::new(config, ram).unwrap();
    fifo.flow()
        .configure_window(BASE, BASE + (units - 1) * COMMAND_UNIT_SIZE)
        .unwrap();
    fifo.flow().set_read_enabled(true);
    Arc::new(fifo)
}

/// Checks that units arrive as an unbroken counter sequence.
#[derive(Clone, Default)]
struct SequenceDecoder {
    next: Arc<AtomicUsize>,
    out_of_order: Arc<AtomicUsize>,
}

impl CommandDecoder for SequenceDecoder {
    fn decode(&mut self, fifo: &mut FifoBuffer, _skip_frame: bool) -> u32 {
        let pending = fifo.pending().len() / UNIT * UNIT;
        for unit in fifo.pending()[..pending].chunks_exact(UNIT) {
            let mut word = [0u8; 4];
            word.copy_from_slice(&unit[..4]);
            let seq = u32::from_le_bytes(word) as usize;
            if seq != self.next.load(Ordering::Relaxed) {
                self.out_of_order.fetch_add(1, Ordering::Relaxed);
            }
            self.next.store(seq + 1, Ordering::Relaxed);
        }
        fifo.consume(pending);
        10
    }
}

fn sequence_unit(seq: u32) -> [u8; UNIT] {
    let mut unit = [0u8; UNIT];
    for chunk in unit.chunks_exact_mut(4) {
        chunk.copy_from_slice(&seq.to_le_bytes());
    }
    unit
}

fn spawn_loop<D, H>(
    fifo: &Arc<Fifo>,
    mut decoder: D,
    mut host: H,
) -> JoinHandle<gx_fifo::Result<()>>
where
    D: CommandDecoder + 'static,
    H: VideoHost + 'static,
{
    let fifo = fifo.clone();
    let handle = {
        let fifo = fifo.clone();
        thread::spawn(move || fifo.run_gpu_loop(&mut decoder, &mut host))
    };
    wait_until("GPU loop start", || fifo.is_gpu_running());
    handle
}

#[test]
fn threaded_stream_is_delivered_without_loss() {
    const TOTAL: u32 = 20_000;
    let fifo = new_fifo(64, FifoConfig::default());
    let decoder = SequenceDecoder::default();
    let gpu = spawn_loop(&fifo, decoder.clone(), NullVideoHost);

    let cpu = {
        let mut producer = Producer::new(fifo.clone());
        thread::spawn(move || {
            for seq in 0..TOTAL {
                producer.write_spinning(&sequence_unit(seq)).unwrap();
            }
        })
    };
    cpu.join().unwrap();

    wait_until("stream drained", || {
        decoder.next.load(Ordering::Relaxed) == TOTAL as usize
    });
    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();

    assert_eq!(decoder.out_of_order.load(Ordering::Relaxed), 0);
    assert_eq!(fifo.flow().distance(), 0);
    assert_eq!(fifo.flow().read_pointer(), fifo.flow().write_pointer());
}

#[test]
fn exit_from_another_thread_stops_the_loop() {
    let fifo = new_fifo(8, FifoConfig::default());
    let gpu = spawn_loop(&fifo, SequenceDecoder::default(), NullVideoHost);
    assert_eq!(fifo.consumer_state(), ConsumerState::Running);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();

    assert!(!fifo.is_gpu_running());
    assert!(!fifo.flow().is_reading());
    assert!(!fifo.flow().read_enabled());
    assert_eq!(fifo.consumer_state(), ConsumerState::Stopped);
}

#[test]
fn breakpoint_stalls_until_disabled() {
    let fifo = new_fifo(32, FifoConfig::default());
    let bp = BASE + 5 * COMMAND_UNIT_SIZE;
    fifo.flow().set_breakpoint(bp);
    fifo.flow().set_breakpoint_enabled(true);

    let decoder = SequenceDecoder::default();
    let gpu = spawn_loop(&fifo, decoder.clone(), NullVideoHost);
    let mut producer = Producer::new(fifo.clone());
    for seq in 0..10 {
        producer.write(&sequence_unit(seq)).unwrap();
    }

    wait_until("breakpoint stall", || {
        fifo.consumer_state() == ConsumerState::StalledAtBreakpoint
    });
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fifo.flow().read_pointer(), bp);
    assert_eq!(decoder.next.load(Ordering::Relaxed), 5);
    assert!(fifo.flow().status().at_breakpoint);

    fifo.flow().set_breakpoint_enabled(false);
    wait_until("drain after breakpoint", || fifo.flow().distance() == 0);
    assert_eq!(decoder.next.load(Ordering::Relaxed), 10);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
}

#[test]
fn pause_and_resume_preserve_pending_distance() {
    let fifo = new_fifo(16, FifoConfig::default());
    let decoder = SequenceDecoder::default();
    let gpu = spawn_loop(&fifo, decoder.clone(), NullVideoHost);

    let lock = fifo.pause_and_lock();
    assert!(lock.buffer().is_some());
    let mut producer = Producer::new(fifo.clone());
    for seq in 0..4 {
        producer.write(&sequence_unit(seq)).unwrap();
    }
    lock.unlock(false);

    wait_until("paused state", || {
        fifo.consumer_state() == ConsumerState::PausedExternally
    });
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fifo.flow().distance(), 4 * COMMAND_UNIT_SIZE as i64);
    assert_eq!(decoder.next.load(Ordering::Relaxed), 0);

    fifo.set_emulator_running(true);
    wait_until("drain after resume", || fifo.flow().distance() == 0);
    assert_eq!(decoder.next.load(Ordering::Relaxed), 4);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
}

#[test]
fn unlock_with_resume_restores_running_loop() {
    let fifo = new_fifo(16, FifoConfig::default());
    let decoder = SequenceDecoder::default();
    let gpu = spawn_loop(&fifo, decoder.clone(), NullVideoHost);

    let lock = fifo.pause_and_lock();
    assert!(lock.was_running());
    assert_eq!(fifo.consumer_state(), ConsumerState::PausedExternally);
    let mut producer = Producer::new(fifo.clone());
    for seq in 0..3 {
        producer.write(&sequence_unit(seq)).unwrap();
    }
    // Nothing is decoded while the lock is held.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fifo.flow().distance(), 3 * COMMAND_UNIT_SIZE as i64);
    assert_eq!(decoder.next.load(Ordering::Relaxed), 0);

    lock.unlock(true);
    assert!(fifo.is_emulator_running());
    wait_until("drain after resume", || fifo.flow().distance() == 0);
    wait_until("running state", || {
        fifo.consumer_state() == ConsumerState::Running
    });
    assert_eq!(decoder.next.load(Ordering::Relaxed), 3);
    assert_eq!(decoder.out_of_order.load(Ordering::Relaxed), 0);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
}

#[test]
fn snapshot_taken_under_lock_restores_buffer() {
    let fifo = new_fifo(16, FifoConfig::default());
    let gpu = spawn_loop(&fifo, SequenceDecoder::default(), NullVideoHost);
    fifo.set_rendering(false);

    let lock = fifo.pause_and_lock();
    let saved = lock.save_state().unwrap();
    lock.unlock(true);

    fifo.set_rendering(true);
    let mut lock = fifo.pause_and_lock();
    lock.load_state(&saved).unwrap();
    lock.unlock(true);
    assert!(fifo.skip_current_frame());

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
}

#[derive(Clone, Default)]
struct CountingHost {
    light_swaps: Arc<AtomicUsize>,
    statuses: Arc<AtomicUsize>,
}

impl VideoHost for CountingHost {
    fn light_swap(&mut self) {
        self.light_swaps.fetch_add(1, Ordering::Relaxed);
    }

    fn publish_status(&mut self, _status: &FifoStatus) {
        self.statuses.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn idle_loop_forces_heartbeat_presentation() {
    let clock = Arc::new(VirtualClock::new());
    let ram = Arc::new(CommandRam::new(BASE, 8 * UNIT));
    let fifo = Arc::new(
        Fifo::new(FifoConfig::default(), ram)
            .unwrap()
            .with_clock(clock.clone()),
    );
    fifo.flow()
        .configure_window(BASE, BASE + 7 * COMMAND_UNIT_SIZE)
        .unwrap();
    let host = CountingHost::default();
    let gpu = spawn_loop(&fifo, SequenceDecoder::default(), host.clone());

    wait_until("status published", || host.statuses.load(Ordering::Relaxed) > 0);
    assert_eq!(host.light_swaps.load(Ordering::Relaxed), 0);

    clock.advance(Duration::from_millis(20));
    wait_until("heartbeat", || host.light_swaps.load(Ordering::Relaxed) == 1);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
}

#[test]
fn reported_presentation_defers_heartbeat() {
    let clock = Arc::new(VirtualClock::new());
    let ram = Arc::new(CommandRam::new(BASE, 8 * UNIT));
    let fifo = Arc::new(
        Fifo::new(FifoConfig::default(), ram)
            .unwrap()
            .with_clock(clock.clone()),
    );
    fifo.flow()
        .configure_window(BASE, BASE + 7 * COMMAND_UNIT_SIZE)
        .unwrap();
    let host = CountingHost::default();
    let gpu = spawn_loop(&fifo, SequenceDecoder::default(), host.clone());
    wait_until("status published", || host.statuses.load(Ordering::Relaxed) > 0);

    // The renderer presents every 10ms, inside the 13.3ms heartbeat interval.
    for _ in 0..5 {
        clock.advance(Duration::from_millis(10));
        fifo.note_presentation();
    }
    clock.advance(Duration::from_millis(10));
    let seen = host.statuses.load(Ordering::Relaxed);
    wait_until("loop iterations", || {
        host.statuses.load(Ordering::Relaxed) > seen + 100
    });
    assert_eq!(host.light_swaps.load(Ordering::Relaxed), 0);

    // 15ms after the last presentation the loop steps in.
    clock.advance(Duration::from_millis(5));
    wait_until("heartbeat", || host.light_swaps.load(Ordering::Relaxed) == 1);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
}

#[test]
fn sync_gpu_mode_waits_for_granted_ticks() {
    let fifo = new_fifo(
        16,
        FifoConfig {
            sync_gpu: true,
            ..FifoConfig::default()
        },
    );
    let decoder = SequenceDecoder::default();
    let gpu = spawn_loop(&fifo, decoder.clone(), NullVideoHost);
    let mut producer = Producer::new(fifo.clone());
    for seq in 0..4 {
        producer.write(&sequence_unit(seq)).unwrap();
    }

    thread::sleep(Duration::from_millis(20));
    assert_eq!(decoder.next.load(Ordering::Relaxed), 0);

    // Each loop iteration rewinds the budget to the clock origin, so keep granting.
    let deadline = Instant::now() + Duration::from_secs(10);
    while fifo.flow().distance() != 0 {
        assert!(Instant::now() < deadline, "timed out waiting for paced drain");
        fifo.grant_ticks(1_000);
        thread::yield_now();
    }
    assert_eq!(decoder.next.load(Ordering::Relaxed), 4);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
}

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<FifoAlert>>>);

impl AlertSink for RecordingSink {
    fn alert(&self, alert: &FifoAlert) {
        self.0.lock().unwrap().push(alert.clone());
    }
}

#[test]
fn shutdown_while_active_is_refused_and_alerted() {
    let sink = RecordingSink::default();
    let ram = Arc::new(CommandRam::new(BASE, 8 * UNIT));
    let fifo = Arc::new(
        Fifo::new(FifoConfig::default(), ram)
            .unwrap()
            .with_alert_sink(Box::new(sink.clone())),
    );
    let gpu = spawn_loop(&fifo, SequenceDecoder::default(), NullVideoHost);

    assert_eq!(fifo.shutdown(), Err(FifoError::ShutdownWhileActive));
    assert_eq!(*sink.0.lock().unwrap(), vec![FifoAlert::ShutdownWhileActive]);

    fifo.exit_gpu_loop();
    gpu.join().unwrap().unwrap();
    fifo.shutdown().unwrap();
}

#[test]
fn exit_called_from_the_decoder_does_not_deadlock() {
    struct StopAfterFirst(Arc<Fifo>);
    impl CommandDecoder for StopAfterFirst {
        fn decode(&mut self, fifo: &mut FifoBuffer, _skip_frame: bool) -> u32 {
            let n = fifo.pending().len();
            fifo.consume(n);
            self.0.exit_gpu_loop();
            0
        }
    }

    let fifo = new_fifo(8, FifoConfig::default());
    let gpu = spawn_loop(&fifo, StopAfterFirst(fifo.clone()), NullVideoHost);
    let mut producer = Producer::new(fifo.clone());
    producer.write(&[0u8; 3 * UNIT]).unwrap();

    gpu.join().unwrap().unwrap();
    assert_eq!(fifo.flow().distance(), 2 * COMMAND_UNIT_SIZE as i64);
}
