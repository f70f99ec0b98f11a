use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, ValueEnum};
use gx_fifo::{
    CommandRam, Fifo, FifoConfig, FifoError, FifoStatus, NullVideoHost, Producer,
    COMMAND_UNIT_SIZE,
};
use gx_xfb::XfbConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod decoder;

use decoder::{CountingDecoder, DecodeStats};

const DEFAULT_WINDOW_BASE: u32 = 0x0030_0000;
const DEFAULT_WINDOW_UNITS: u32 = 1024;
const DEFAULT_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Mode {
    /// CPU and GPU run on separate threads.
    Threaded,
    /// The GPU drains synchronously on the producing thread.
    SingleCore,
}

#[derive(Parser, Debug)]
#[command(
    name = "gx-replay",
    about = "Stream a recorded GX command stream through the FIFO engine and report statistics."
)]
struct Args {
    /// Raw command stream to replay
    input: PathBuf,

    /// JSON file with `fifo`, `xfb` and `window_*` settings
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Threaded)]
    mode: Mode,

    /// Command window size in 32-byte units (overrides the config file)
    #[arg(long, value_name = "UNITS")]
    window_units: Option<u32>,

    /// Host FIFO buffer size in bytes (overrides the config file)
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Producer write size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_BYTES)]
    chunk_bytes: usize,

    /// Write statistics JSON to this path instead of stdout
    #[arg(long, value_name = "PATH")]
    stats_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ReplayConfig {
    fifo: FifoConfig,
    xfb: XfbConfig,
    window_base: u32,
    window_units: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            fifo: FifoConfig::default(),
            xfb: XfbConfig::default(),
            window_base: DEFAULT_WINDOW_BASE,
            window_units: DEFAULT_WINDOW_UNITS,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplayStats {
    mode: Mode,
    input_bytes: u64,
    /// Input length rounded up to whole command units (the tail is padded with NOPs).
    committed_bytes: u64,
    elapsed_us: u64,
    decode: DecodeStats,
    xfb_records: usize,
    fifo: FifoStatus,
}

fn load_config(args: &Args) -> anyhow::Result<ReplayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => ReplayConfig::default(),
    };
    if let Some(units) = args.window_units {
        config.window_units = units;
    }
    if let Some(size) = args.buffer_size {
        config.fifo.buffer_size = size;
    }
    if config.window_units == 0 {
        bail!("window must hold at least one command unit");
    }
    if args.chunk_bytes == 0 {
        bail!("--chunk-bytes must be > 0");
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let input = fs::read(&args.input)
        .with_context(|| format!("read input {}", args.input.display()))?;

    let window_len = config
        .window_units
        .checked_mul(COMMAND_UNIT_SIZE)
        .ok_or_else(|| anyhow!("window of {} units is too large", config.window_units))?;
    let window_end = config
        .window_base
        .checked_add(window_len - COMMAND_UNIT_SIZE)
        .ok_or_else(|| anyhow!("window does not fit in the address space"))?;

    let ram = Arc::new(CommandRam::new(config.window_base, window_len as usize));
    let fifo = Arc::new(Fifo::new(config.fifo.clone(), ram)?);
    fifo.flow().configure_window(config.window_base, window_end)?;
    fifo.flow().set_read_enabled(true);

    let decoder = CountingDecoder::new(config.xfb.clone())?;
    info!(
        input_bytes = input.len(),
        window_units = config.window_units,
        mode = ?args.mode,
        "replaying command stream"
    );

    let start = Instant::now();
    let decoder = match args.mode {
        Mode::Threaded => replay_threaded(&fifo, decoder, &input, args.chunk_bytes)?,
        Mode::SingleCore => replay_single_core(&fifo, decoder, &input, args.chunk_bytes)?,
    };
    let elapsed = start.elapsed();

    let unit = COMMAND_UNIT_SIZE as u64;
    let stats = ReplayStats {
        mode: args.mode,
        input_bytes: input.len() as u64,
        committed_bytes: (input.len() as u64).div_ceil(unit) * unit,
        elapsed_us: elapsed.as_micros() as u64,
        decode: decoder.stats().clone(),
        xfb_records: decoder.xfb().len(),
        fifo: fifo.flow().status(),
    };
    fifo.shutdown()?;

    let json = serde_json::to_string_pretty(&stats).context("serialize stats")?;
    match &args.stats_out {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("write stats {}", path.display()))?
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn replay_threaded(
    fifo: &Arc<Fifo>,
    mut decoder: CountingDecoder,
    input: &[u8],
    chunk_bytes: usize,
) -> anyhow::Result<CountingDecoder> {
    let gpu = {
        let fifo = fifo.clone();
        thread::Builder::new()
            .name("gx-gpu".to_string())
            .spawn(move || {
                let result = fifo.run_gpu_loop(&mut decoder, &mut NullVideoHost);
                (result, decoder)
            })
            .context("spawn GPU thread")?
    };
    while !fifo.is_gpu_running() && !gpu.is_finished() {
        thread::yield_now();
    }

    let mut producer = Producer::new(fifo.clone());
    let fed = feed_threaded(fifo, &mut producer, input, chunk_bytes);

    fifo.exit_gpu_loop();
    let (result, decoder) = gpu
        .join()
        .map_err(|_| anyhow!("GPU thread panicked"))?;
    result.context("GPU loop failed")?;
    fed?;
    Ok(decoder)
}

fn feed_threaded(
    fifo: &Fifo,
    producer: &mut Producer,
    input: &[u8],
    chunk_bytes: usize,
) -> anyhow::Result<()> {
    for chunk in input.chunks(chunk_bytes) {
        if !fifo.is_gpu_running() {
            bail!("GPU loop stopped early");
        }
        producer.write_spinning(chunk)?;
    }
    producer.flush()?;

    while fifo.flow().distance() > 0 {
        if !fifo.is_gpu_running() {
            bail!("GPU loop stopped with {} bytes pending", fifo.flow().distance());
        }
        thread::sleep(Duration::from_micros(100));
    }
    debug!("stream drained");
    Ok(())
}

fn replay_single_core(
    fifo: &Arc<Fifo>,
    mut decoder: CountingDecoder,
    input: &[u8],
    chunk_bytes: usize,
) -> anyhow::Result<CountingDecoder> {
    let mut producer = Producer::new(fifo.clone());
    for chunk in input.chunks(chunk_bytes) {
        push_and_drain(fifo, &mut producer, &mut decoder, chunk)?;
    }
    // Pad the trailing partial unit with NOPs.
    let unit = COMMAND_UNIT_SIZE as usize;
    let pad = (unit - producer.staged_len() % unit) % unit;
    push_and_drain(fifo, &mut producer, &mut decoder, &vec![0u8; pad])?;
    fifo.run_single_core(&mut decoder)?;
    Ok(decoder)
}

fn push_and_drain(
    fifo: &Fifo,
    producer: &mut Producer,
    decoder: &mut CountingDecoder,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let mut pending = producer.write(bytes);
    loop {
        match pending {
            Ok(()) => return Ok(()),
            Err(FifoError::WindowFull { .. }) => {
                fifo.run_single_core(decoder)?;
                pending = producer.commit().map(|_| ());
            }
            Err(err) => return Err(err.into()),
        }
    }
}
