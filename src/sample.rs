//! Sample Type Module
//!
//! The whole engine is generic over the audio sample type so that hosts can
//! run it in single or double precision without duplicated code paths.

use num_traits::Float;
use std::fmt::Debug;
use std::ops::AddAssign;

/// A real audio sample. Implemented for `f32` and `f64`.
pub trait Sample: Float + AddAssign + Default + Debug + Send + Sync + 'static {
    /// Converts an `f64` scalar (gains, envelope levels, window values)
    /// into this sample type.
    fn coerce(value: f64) -> Self;

    /// Widens this sample to `f64` for analysis arithmetic.
    fn as_f64(self) -> f64;

    /// Converts an `f32` scalar into this sample type.
    #[inline]
    fn coerce32(value: f32) -> Self {
        Self::coerce(value as f64)
    }
}

impl Sample for f32 {
    #[inline]
    fn coerce(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for f64 {
    #[inline]
    fn coerce(value: f64) -> Self {
        value
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}

/// Fills `window` with a periodic Hann window of length `size`.
///
/// Only the first `size` samples are written; the rest of the slice is
/// zeroed. Analysis grains are two pitch periods long, so `size` follows
/// the detected period from block to block.
pub fn fill_hann_window<S: Sample>(window: &mut [S], size: usize) {
    debug_assert!(size <= window.len());

    for w in window.iter_mut() {
        *w = S::zero();
    }

    if size < 2 {
        return;
    }

    let scale = std::f64::consts::TAU / size as f64;
    for (i, w) in window.iter_mut().take(size).enumerate() {
        *w = S::coerce(0.5 * (1.0 - (scale * i as f64).cos()));
    }
}
