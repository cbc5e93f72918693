//! Converter worker entry point
//!
//! Runs a batch of synthetic frames through the software converter and
//! reports what came back.

use anyhow::{Context, Result};
use clap::Parser;
use config::{LoggingConfig, RuntimeConfig};
use converter_worker::{
    BayerOrder, Frame, FrameMetadata, FrameStatus, PixelFormat, SharedFrame, StreamConfig, SwConverter,
};
use messaging_objects::{Object, ObjectImpl, Thread, ThreadOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to convert
    #[arg(long, default_value_t = 8)]
    frames: u32,

    /// Input width in pixels
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Input height in pixels
    #[arg(long, default_value_t = 480)]
    height: u32,
}

/// Collects completions on the main thread
#[derive(Debug, Default)]
struct FrameSink {
    completed: Vec<u32>,
    failed: usize,
    inputs_released: usize,
}

impl FrameSink {
    fn output_ready(&mut self, frame: SharedFrame) {
        let metadata = frame.metadata();
        match metadata.status {
            FrameStatus::Success => self.completed.push(metadata.sequence),
            status => {
                warn!(sequence = metadata.sequence, status = ?status, "Frame not converted");
                self.failed += 1;
            }
        }
    }

    fn input_ready(&mut self, _frame: SharedFrame) {
        self.inputs_released += 1;
    }
}

impl ObjectImpl for FrameSink {}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn thread_options(runtime: &RuntimeConfig, name: &str) -> ThreadOptions {
    let settings = runtime.thread(name);
    let options = ThreadOptions::named(name).with_queue_warn_depth(settings.warn_depth());
    match settings.stack_size_bytes() {
        Some(bytes) => options.with_stack_size(bytes),
        None => options,
    }
}

/// Line stride of a 10-bit CSI-2 packed row
fn packed_stride(width: u32) -> Result<u32> {
    width
        .checked_mul(5)
        .map(|bits| bits / 4)
        .with_context(|| format!("Input width {} too large", width))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = config::load_config(args.config.as_deref()).context("Failed to load runtime configuration")?;
    init_tracing(&runtime.logging);

    info!("Starting converter worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Ok(rendered) = runtime.to_toml() {
        debug!("Effective configuration:\n{}", rendered);
    }

    let converter =
        SwConverter::new(thread_options(&runtime, "converter")).context("Failed to create converter")?;

    let input = StreamConfig {
        pixel_format: PixelFormat::Raw10Csi2(BayerOrder::Rggb),
        width: args.width,
        height: args.height,
        stride: packed_stride(args.width)?,
    };
    let (out_width, out_height) =
        SwConverter::output_size(input.width, input.height).context("Input size too small")?;
    let (out_stride, _) = SwConverter::stride_and_frame_size(PixelFormat::Rgb888, out_width, out_height)
        .context("Output format not supported")?;
    let output = StreamConfig {
        pixel_format: PixelFormat::Rgb888,
        width: out_width,
        height: out_height,
        stride: out_stride,
    };

    converter
        .configure(&input, &[output])
        .context("Failed to configure converter")?;
    let buffers = converter
        .export_buffers(0, args.frames)
        .context("Failed to export output buffers")?;

    let sink = Object::new(FrameSink::default());
    converter.output_buffer_ready().connect_auto(&sink, FrameSink::output_ready);
    converter.input_buffer_ready().connect_auto(&sink, FrameSink::input_ready);

    converter.start().context("Failed to start converter")?;

    let epoch = Instant::now();
    let input_size = input.stride as usize * input.height as usize;
    for (sequence, buffer) in buffers.iter().enumerate() {
        let frame = Frame::new(sequence as u32, input_size);
        frame.set_metadata(FrameMetadata {
            sequence: sequence as u32,
            timestamp_ns: epoch.elapsed().as_nanos() as u64,
            ..FrameMetadata::default()
        });
        let outputs = BTreeMap::from([(0, Arc::clone(buffer))]);
        converter
            .queue_buffers(frame, &outputs)
            .context("Failed to queue frame")?;
    }

    converter.stop().context("Failed to stop converter")?;

    let delivered = Thread::current()
        .dispatch_messages()
        .context("Failed to deliver completions")?;
    let processed = converter.frames_processed()?;
    let (completed, failed, released) = sink
        .with_state(|s| (s.completed.len(), s.failed, s.inputs_released))
        .context("Failed to read completions")?;

    let stats = converter.stats();
    info!(
        processed,
        completed,
        failed,
        released,
        delivered,
        queue_high_water = stats.queue_high_water,
        elapsed_ms = epoch.elapsed().as_millis() as u64,
        "Converter worker finished"
    );
    Ok(())
}
