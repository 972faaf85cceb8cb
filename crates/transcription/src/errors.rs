use thiserror::Error;

/// Audio ingestion failures.
///
/// Construction-time variants terminate the stream; per-packet decode
/// failures are swallowed by the converter (the packet is lost, the stream
/// continues).
#[derive(Debug, Error)]
pub enum AudioFormatError {
    #[error("unsupported audio format tag: {0}")]
    UnsupportedFormat(String),

    #[error("expected {expected}-byte frame, got {actual} bytes")]
    FrameSize { expected: usize, actual: usize },

    #[error("decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("resample failed: {0}")]
    Resample(String),
}

/// Recognizer failures.
#[derive(Debug, Error)]
pub enum SttError {
    #[error("recognition model not loaded")]
    ModelNotLoaded,

    #[error("recognition failed: {0}")]
    ProcessingFailed(String),
}
