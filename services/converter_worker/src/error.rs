//! Converter error types

use messaging_objects::ObjectError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConverterError>;

#[derive(Error, Debug)]
pub enum ConverterError {
    /// Only a single output stream is supported
    #[error("Unsupported number of output streams: {0}")]
    UnsupportedOutputCount(usize),

    /// Output buffer addressed to a stream that does not exist
    #[error("Invalid output stream index {0}")]
    InvalidOutput(u32),

    /// `queue_buffers` called without any output buffer
    #[error("No output buffers queued")]
    NoOutputs,

    #[error("Input format {0} not supported")]
    UnsupportedInput(String),

    #[error("Output format {0} not supported")]
    UnsupportedOutput(String),

    /// Operation requires a configured converter
    #[error("Converter is not configured")]
    NotConfigured,

    /// Failure delivering a call to the worker thread
    #[error("Worker call failed: {0}")]
    Object(#[from] ObjectError),
}
