//! Error Module
//!
//! Configuration and prepare-time errors. Audio-path methods never return
//! errors: voice stealing, unvoiced frames, empty grain lists and
//! out-of-range pitches are all normal outcomes reflected in the output.

use thiserror::Error;

/// Rejectable configuration input. Setters return this and leave the prior
/// configuration intact.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid pitch detection range: min {min} Hz must be > 0 and < max {max} Hz")]
    InvalidHzRange { min: f32, max: f32 },

    #[error("invalid voice count {0}: must be in [1, 16]")]
    InvalidVoiceCount(usize),

    #[error("invalid blocksize {0}: must be >= 32")]
    InvalidBlocksize(usize),

    #[error("invalid samplerate {0}: must be > 0")]
    InvalidSamplerate(f64),

    #[error("invalid stereo width {0}: must be in [0, 100]")]
    InvalidStereoWidth(u8),

    #[error("invalid ADSR parameters: times must be >= 0 and sustain in [0, 1]")]
    InvalidAdsr,

    #[error("invalid confidence thresholds: upper {upper} and lower {lower} must be > 0 with lower <= upper")]
    InvalidConfidenceThresh { upper: f32, lower: f32 },

    #[error("invalid unvoiced period range {min}..={max}: need 2 <= min <= max")]
    InvalidUnvoicedPeriodRange { min: usize, max: usize },

    #[error("engine has not been prepared")]
    NotPrepared,
}
