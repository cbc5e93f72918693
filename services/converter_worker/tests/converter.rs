//! Software converter end-to-end tests
//!
//! Drives the converter from the test thread and checks that configuration
//! errors surface through blocking calls, and that queued frames come back
//! through the completion signals in order.

use converter_worker::{
    BayerOrder, ConverterError, Frame, FrameMetadata, FrameStatus, PixelFormat, SharedFrame, StreamConfig,
    SwConverter,
};
use messaging_objects::{Object, ObjectImpl, Thread, ThreadOptions};
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use std::time::Duration;

const WIDTH: u32 = 32;
const HEIGHT: u32 = 16;

fn input_config() -> StreamConfig {
    StreamConfig {
        pixel_format: PixelFormat::Raw10Csi2(BayerOrder::Bggr),
        width: WIDTH,
        height: HEIGHT,
        stride: WIDTH * 5 / 4,
    }
}

fn output_config() -> StreamConfig {
    StreamConfig {
        pixel_format: PixelFormat::Rgb888,
        width: WIDTH - 2,
        height: HEIGHT - 2,
        stride: (WIDTH - 2) * 3,
    }
}

fn configured(name: &str) -> SwConverter {
    let converter = SwConverter::new(ThreadOptions::named(name)).unwrap();
    converter.configure(&input_config(), &[output_config()]).unwrap();
    converter
}

fn input_frame(sequence: u32) -> SharedFrame {
    let config = input_config();
    let frame = Frame::new(sequence, (config.stride * config.height) as usize);
    frame.set_metadata(FrameMetadata {
        sequence,
        timestamp_ns: u64::from(sequence) * 33_000_000,
        ..FrameMetadata::default()
    });
    frame
}

#[derive(Default)]
struct Completions {
    sequences: Vec<u32>,
    threads: Vec<String>,
}

impl Completions {
    fn output_ready(&mut self, frame: SharedFrame) {
        self.sequences.push(frame.metadata().sequence);
        self.threads.push(Thread::current().name().to_string());
    }
}

impl ObjectImpl for Completions {}

#[test]
fn test_configure_rejects_multiple_outputs() {
    let converter = SwConverter::new(ThreadOptions::named("multi-output")).unwrap();
    let err = converter
        .configure(&input_config(), &[output_config(), output_config()])
        .unwrap_err();
    assert!(matches!(err, ConverterError::UnsupportedOutputCount(2)));
}

#[test]
fn test_configure_rejects_unsupported_input() {
    let converter = SwConverter::new(ThreadOptions::named("raw8-input")).unwrap();
    let mut input = input_config();
    input.pixel_format = PixelFormat::Raw8(BayerOrder::Bggr);

    let err = converter.configure(&input, &[output_config()]).unwrap_err();
    assert!(matches!(err, ConverterError::UnsupportedInput(_)));
}

#[test]
fn test_export_requires_configuration() {
    let converter = SwConverter::new(ThreadOptions::named("unconfigured")).unwrap();
    assert!(matches!(
        converter.export_buffers(0, 2).unwrap_err(),
        ConverterError::NotConfigured
    ));
}

#[test]
fn test_export_buffers_sized_for_output() {
    let converter = configured("export");
    let buffers = converter.export_buffers(0, 3).unwrap();

    let output = output_config();
    assert_eq!(buffers.len(), 3);
    for (index, buffer) in buffers.iter().enumerate() {
        assert_eq!(buffer.index(), index as u32);
        assert_eq!(buffer.len(), (output.stride * output.height) as usize);
    }
    assert!(matches!(
        converter.export_buffers(1, 1).unwrap_err(),
        ConverterError::InvalidOutput(1)
    ));
}

#[test]
fn test_queue_buffers_validates_outputs() {
    let converter = configured("validate");
    let buffer = converter.export_buffers(0, 1).unwrap().remove(0);

    let err = converter
        .queue_buffers(input_frame(0), &BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, ConverterError::NoOutputs));

    let outputs = BTreeMap::from([(0, Arc::clone(&buffer)), (1, buffer)]);
    let err = converter.queue_buffers(input_frame(0), &outputs).unwrap_err();
    assert!(matches!(err, ConverterError::InvalidOutput(1)));
}

#[test]
fn test_frames_complete_in_order_on_worker_thread() {
    let converter = configured("ordered-converter");
    let buffers = converter.export_buffers(0, 6).unwrap();

    let (tx, rx) = mpsc::channel();
    converter.output_buffer_ready().connect_fn(move |frame: SharedFrame| {
        let _ = tx.send((
            frame.metadata(),
            Thread::current().name().to_string(),
        ));
    });
    converter.start().unwrap();

    for (sequence, buffer) in buffers.iter().enumerate() {
        let outputs = BTreeMap::from([(0, Arc::clone(buffer))]);
        converter
            .queue_buffers(input_frame(sequence as u32), &outputs)
            .unwrap();
    }
    converter.stop().unwrap();

    let output = output_config();
    for expected in 0..6u32 {
        let (metadata, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(metadata.sequence, expected);
        assert_eq!(metadata.timestamp_ns, u64::from(expected) * 33_000_000);
        assert_eq!(metadata.status, FrameStatus::Success);
        assert_eq!(metadata.bytes_used, (output.stride * output.height) as usize);
        assert_eq!(thread, "ordered-converter");
    }
    assert_eq!(converter.frames_processed().unwrap(), 6);
}

#[test]
fn test_completions_queued_back_to_receiver_thread() {
    let converter = configured("auto-converter");
    let buffers = converter.export_buffers(0, 4).unwrap();

    let completions = Object::new(Completions::default());
    converter
        .output_buffer_ready()
        .connect_auto(&completions, Completions::output_ready);
    converter.start().unwrap();

    for (sequence, buffer) in buffers.iter().enumerate() {
        let outputs = BTreeMap::from([(0, Arc::clone(buffer))]);
        converter
            .queue_buffers(input_frame(sequence as u32), &outputs)
            .unwrap();
    }
    converter.stop().unwrap();

    assert_eq!(Thread::current().dispatch_messages().unwrap(), 4);
    let (sequences, threads) = completions
        .with_state(|c| (c.sequences.clone(), c.threads.clone()))
        .unwrap();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    assert!(threads.iter().all(|name| *name == Thread::current().name()));
}

#[test]
fn test_frames_before_start_are_cancelled() {
    let converter = configured("not-started");
    let buffer = converter.export_buffers(0, 1).unwrap().remove(0);

    let outputs = BTreeMap::from([(0, Arc::clone(&buffer))]);
    converter.queue_buffers(input_frame(5), &outputs).unwrap();
    converter.stop().unwrap();

    assert_eq!(buffer.metadata().status, FrameStatus::Cancelled);
    assert_eq!(buffer.metadata().sequence, 5);
    assert_eq!(converter.frames_processed().unwrap(), 0);
}

#[test]
fn test_input_released_after_output() {
    let converter = configured("release-order");
    let buffer = converter.export_buffers(0, 1).unwrap().remove(0);

    let (tx, rx) = mpsc::channel();
    let output_tx = tx.clone();
    converter
        .output_buffer_ready()
        .connect_fn(move |_frame: SharedFrame| {
            let _ = output_tx.send("output");
        });
    converter
        .input_buffer_ready()
        .connect_fn(move |_frame: SharedFrame| {
            let _ = tx.send("input");
        });
    converter.start().unwrap();

    let outputs = BTreeMap::from([(0, buffer)]);
    converter.queue_buffers(input_frame(0), &outputs).unwrap();
    converter.stop().unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "output");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "input");
}
