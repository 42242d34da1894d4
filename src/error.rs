//! Error types for the playback pipeline.

/// Errors a caller of [`crate::PlaybackCore`] may observe.
///
/// Failures that the pipeline can absorb on its own — underflow, overflow,
/// a non-fatal resampler compensation failure — are not represented here;
/// they are handled internally (silence insertion, sample skipping, a
/// logged warning) and never reach the caller.
#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    /// The audio device could not be opened.
    #[error("failed to open audio device: {0}")]
    DeviceOpen(String),

    /// The resampler could not be allocated or initialized.
    #[error("failed to initialize resampler: {0}")]
    ResamplerInit(String),

    /// The sample ring could not be allocated.
    #[error("failed to allocate sample ring: {0}")]
    RingAlloc(String),

    /// The producer-local scratch buffer could not be grown.
    #[error("failed to grow scratch buffer to {requested} samples")]
    ScratchAlloc {
        /// The sample count the scratch buffer needed to grow to.
        requested: usize,
    },

    /// The resampler failed to convert an input frame.
    #[error("resample conversion failed: {0}")]
    ResampleConvert(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, PlaybackError>;
