//! Software Converter
//!
//! [`SwConverter`] is the pipeline-facing half of a software format converter.
//! The conversion state lives in an `Isp` object that is moved to a dedicated
//! worker [`Thread`] at construction; every call into it crosses threads:
//!
//! ```text
//!  pipeline thread                          "converter" thread
//! ┌─────────────────────────┐              ┌──────────────────────────┐
//! │ SwConverter             │  Blocking    │ Isp                      │
//! │  configure / start /    │─────────────►│  configure / start /     │
//! │  stop / export_buffers  │◄─── result ──│  stop / export_buffers   │
//! │                         │              │                          │
//! │  queue_buffers ─────────┼── Queued ───►│  process ──┐             │
//! │                         │              │            ▼             │
//! │  output_buffer_ready ◄──┼──── emit ────┼── output, then input     │
//! │  input_buffer_ready  ◄──┼──────────────┼──                        │
//! └─────────────────────────┘              └──────────────────────────┘
//! ```
//!
//! Only 10-bit CSI-2 packed Bayer input and RGB888 output are accepted. The
//! output drops one pixel on each border, so a `W`x`H` input produces a
//! `(W-2)`x`(H-2)` output. The worker does not touch pixel values: it
//! validates buffers, carries metadata across and reports completion.

use crate::error::{ConverterError, Result};
use crate::frame::{Frame, FrameMetadata, FrameStatus, PixelFormat, SharedFrame, StreamConfig};
use messaging_objects::{IdleTracker, Message, Object, ObjectImpl, Signal, Thread, ThreadOptions, ThreadStatsSnapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Completion signals, emitted from the worker thread
#[derive(Default)]
struct ConverterSignals {
    input_buffer_ready: Signal<SharedFrame>,
    output_buffer_ready: Signal<SharedFrame>,
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    red_offset: (u32, u32),
    input_size: usize,
    output_size: usize,
}

struct Isp {
    signals: Arc<ConverterSignals>,
    layout: Option<Layout>,
    running: bool,
    processed: u64,
}

impl Isp {
    fn new(signals: Arc<ConverterSignals>) -> Self {
        Self {
            signals,
            layout: None,
            running: false,
            processed: 0,
        }
    }

    fn configure(&mut self, input: &StreamConfig, output: &StreamConfig) -> Result<()> {
        let PixelFormat::Raw10Csi2(order) = input.pixel_format else {
            error!(input = %input, "Input format not supported");
            return Err(ConverterError::UnsupportedInput(input.to_string()));
        };
        if input.width < 2 || input.height < 2 {
            error!(input = %input, "Input format not supported");
            return Err(ConverterError::UnsupportedInput(input.to_string()));
        }

        let expected = SwConverter::output_size(input.width, input.height);
        if Some((output.width, output.height)) != expected
            || output.width.checked_mul(3) != Some(output.stride)
            || output.pixel_format != PixelFormat::Rgb888
        {
            error!(output = %output, "Output format not supported");
            return Err(ConverterError::UnsupportedOutput(output.to_string()));
        }

        let layout = Layout {
            red_offset: order.red_offset(),
            input_size: input.stride as usize * input.height as usize,
            output_size: output.stride as usize * output.height as usize,
        };
        info!(input = %input, output = %output, "Software converter configured");
        debug!(red_offset = ?layout.red_offset, "Bayer layout");
        self.layout = Some(layout);
        Ok(())
    }

    fn export_buffers(&self, count: u32) -> Result<Vec<SharedFrame>> {
        let layout = self.layout.ok_or(ConverterError::NotConfigured)?;
        Ok((0..count)
            .map(|index| Frame::new(index, layout.output_size))
            .collect())
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn process(&mut self, input: &SharedFrame, output: &SharedFrame) {
        let source = input.metadata();
        let mut metadata = FrameMetadata {
            status: source.status,
            sequence: source.sequence,
            timestamp_ns: source.timestamp_ns,
            bytes_used: 0,
        };

        match self.layout {
            None => {
                error!(sequence = source.sequence, "Frame queued to unconfigured converter");
                metadata.status = FrameStatus::Error;
            }
            Some(_) if !self.running => {
                metadata.status = FrameStatus::Cancelled;
            }
            Some(layout) if input.len() < layout.input_size || output.len() < layout.output_size => {
                error!(
                    sequence = source.sequence,
                    input = input.len(),
                    output = output.len(),
                    "Frame buffers too small for configured layout"
                );
                metadata.status = FrameStatus::Error;
            }
            Some(layout) => {
                metadata.bytes_used = layout.output_size;
                self.processed += 1;
            }
        }

        output.set_metadata(metadata);
        self.signals.output_buffer_ready.emit(Arc::clone(output));
        self.signals.input_buffer_ready.emit(Arc::clone(input));
    }
}

impl ObjectImpl for Isp {
    fn message(&mut self, msg: Message<Self>) {
        match msg {
            Message::ThreadMove(thread) => {
                debug!(thread = %thread.name(), "Converter worker changing thread");
            }
            other => other.dispatch(self),
        }
    }
}

/// Software format converter driven from the pipeline thread
pub struct SwConverter {
    thread: Thread,
    isp: Object<Isp>,
    signals: Arc<ConverterSignals>,
    idle: IdleTracker,
}

impl SwConverter {
    /// Create the converter and start its worker thread
    pub fn new(options: ThreadOptions) -> Result<Self> {
        let thread = Thread::with_options(options);
        let signals = Arc::new(ConverterSignals::default());
        let isp = Object::new(Isp::new(Arc::clone(&signals)));

        isp.move_to_thread(&thread)?;
        thread.start()?;

        info!(thread = %thread.name(), "Software converter created");
        Ok(Self {
            thread,
            isp,
            signals,
            idle: IdleTracker::new(),
        })
    }

    /// Output formats producible from `input`
    pub fn formats(input: PixelFormat) -> Vec<PixelFormat> {
        match input {
            PixelFormat::Raw10Csi2(_) => vec![PixelFormat::Rgb888],
            other => {
                info!(input = %other, "Unsupported input format");
                Vec::new()
            }
        }
    }

    /// Output size for a `width`x`height` input
    pub fn output_size(width: u32, height: u32) -> Option<(u32, u32)> {
        if width < 2 || height < 2 {
            error!(width, height, "Input format size too small");
            return None;
        }
        Some((width - 2, height - 2))
    }

    /// Line stride and total size of an output frame
    pub fn stride_and_frame_size(format: PixelFormat, width: u32, height: u32) -> Option<(u32, usize)> {
        match format {
            PixelFormat::Rgb888 => {
                let stride = width.checked_mul(3)?;
                Some((stride, stride as usize * height as usize))
            }
            _ => None,
        }
    }

    /// Apply stream configuration on the worker
    pub fn configure(&self, input: &StreamConfig, outputs: &[StreamConfig]) -> Result<()> {
        let [output] = outputs else {
            error!(count = outputs.len(), "Unsupported number of output streams");
            return Err(ConverterError::UnsupportedOutputCount(outputs.len()));
        };
        self.isp
            .invoke_blocking(|isp: &mut Isp| isp.configure(input, output))?
    }

    /// Allocate `count` buffers sized for output stream `output`
    pub fn export_buffers(&self, output: u32, count: u32) -> Result<Vec<SharedFrame>> {
        if output >= 1 {
            return Err(ConverterError::InvalidOutput(output));
        }
        self.isp
            .invoke_blocking(|isp: &mut Isp| isp.export_buffers(count))?
    }

    pub fn start(&self) -> Result<()> {
        self.isp.invoke_blocking(|isp: &mut Isp| isp.start())?;
        Ok(())
    }

    /// Stop processing and wait until every queued frame has been reported
    pub fn stop(&self) -> Result<()> {
        self.isp.invoke_blocking(|isp: &mut Isp| isp.stop())?;
        self.idle.wait_for_idle();
        Ok(())
    }

    /// Queue `input` for conversion into the buffers of `outputs`
    ///
    /// `outputs` maps output stream index to buffer. Completion is reported
    /// through [`SwConverter::output_buffer_ready`] and
    /// [`SwConverter::input_buffer_ready`].
    pub fn queue_buffers(&self, input: SharedFrame, outputs: &BTreeMap<u32, SharedFrame>) -> Result<()> {
        if let Some(index) = outputs.keys().find(|index| **index >= 1) {
            return Err(ConverterError::InvalidOutput(*index));
        }
        let output = outputs.get(&0).ok_or(ConverterError::NoOutputs)?;

        self.process(input, Arc::clone(output));
        Ok(())
    }

    fn process(&self, input: SharedFrame, output: SharedFrame) {
        let busy = self.idle.begin();
        self.isp.invoke_queued(move |isp: &mut Isp| {
            isp.process(&input, &output);
            drop(busy);
        });
    }

    /// Frames converted since creation
    pub fn frames_processed(&self) -> Result<u64> {
        Ok(self.isp.invoke_blocking(|isp: &mut Isp| isp.processed)?)
    }

    /// Emitted from the worker thread once an input buffer is released
    pub fn input_buffer_ready(&self) -> &Signal<SharedFrame> {
        &self.signals.input_buffer_ready
    }

    /// Emitted from the worker thread once an output buffer is filled
    pub fn output_buffer_ready(&self) -> &Signal<SharedFrame> {
        &self.signals.output_buffer_ready
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn stats(&self) -> ThreadStatsSnapshot {
        self.thread.stats()
    }
}

impl Drop for SwConverter {
    fn drop(&mut self) {
        if let Err(err) = self.thread.stop() {
            error!(thread = %self.thread.name(), error = %err, "Converter worker did not stop cleanly");
        }
    }
}
