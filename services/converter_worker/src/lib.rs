//! Converter Worker Service
//!
//! Software frame converter for pipelines without a hardware ISP. The
//! converter state runs on its own event loop thread; the pipeline drives it
//! with blocking calls for configuration and queued calls for frames, and
//! learns about completed frames through signals.
//!
//! # Examples
//!
//! ```rust
//! use converter_worker::{BayerOrder, PixelFormat, StreamConfig, SwConverter};
//! use messaging_objects::ThreadOptions;
//!
//! let converter = SwConverter::new(ThreadOptions::named("converter")).unwrap();
//! let input = StreamConfig {
//!     pixel_format: PixelFormat::Raw10Csi2(BayerOrder::Rggb),
//!     width: 64,
//!     height: 48,
//!     stride: 80,
//! };
//! let output = StreamConfig {
//!     pixel_format: PixelFormat::Rgb888,
//!     width: 62,
//!     height: 46,
//!     stride: 62 * 3,
//! };
//! converter.configure(&input, &[output]).unwrap();
//! assert_eq!(converter.export_buffers(0, 2).unwrap().len(), 2);
//! ```

pub mod converter;
pub mod error;
pub mod frame;

pub use converter::SwConverter;
pub use error::{ConverterError, Result};
pub use frame::{BayerOrder, Frame, FrameMetadata, FrameStatus, PixelFormat, SharedFrame, StreamConfig};
