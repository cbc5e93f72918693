//! Frame buffers and stream formats
//!
//! Frames are shared between the pipeline and the converter worker through
//! [`SharedFrame`] handles. Pixel data and metadata sit behind their own
//! locks so the pipeline can inspect metadata while the worker writes pixels.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Colour filter arrangement of a Bayer sensor, named by its top-left quad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BayerOrder {
    Bggr,
    Gbrg,
    Grbg,
    Rggb,
}

impl BayerOrder {
    /// Position of the red sample within the 2x2 quad, as (x, y)
    pub fn red_offset(self) -> (u32, u32) {
        match self {
            BayerOrder::Bggr => (0, 0),
            BayerOrder::Gbrg => (1, 0),
            BayerOrder::Grbg => (0, 1),
            BayerOrder::Rggb => (1, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 10-bit Bayer, CSI-2 packed (4 pixels in 5 bytes)
    Raw10Csi2(BayerOrder),
    /// 8-bit Bayer, unpacked
    Raw8(BayerOrder),
    /// 24-bit packed RGB
    Rgb888,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Raw10Csi2(order) => write!(f, "RAW10P-{:?}", order),
            PixelFormat::Raw8(order) => write!(f, "RAW8-{:?}", order),
            PixelFormat::Rgb888 => f.write_str("RGB888"),
        }
    }
}

/// Geometry and format of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per line
    pub stride: u32,
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}-{}", self.width, self.height, self.pixel_format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    #[default]
    Success,
    Error,
    Cancelled,
}

/// Per-frame bookkeeping copied from input to output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetadata {
    pub status: FrameStatus,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub bytes_used: usize,
}

/// Single-plane frame buffer
pub struct Frame {
    index: u32,
    data: Mutex<Vec<u8>>,
    metadata: Mutex<FrameMetadata>,
}

pub type SharedFrame = Arc<Frame>;

impl Frame {
    /// Allocate a zeroed frame of `len` bytes
    pub fn new(index: u32, len: usize) -> SharedFrame {
        Arc::new(Self {
            index,
            data: Mutex::new(vec![0; len]),
            metadata: Mutex::new(FrameMetadata::default()),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metadata(&self) -> FrameMetadata {
        *self.metadata.lock()
    }

    pub fn set_metadata(&self, metadata: FrameMetadata) {
        *self.metadata.lock() = metadata;
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("len", &self.len())
            .field("metadata", &self.metadata())
            .finish()
    }
}
