//! Audio Analysis Module
//!
//! Level measurement helpers used to validate the engine's output in
//! tests and benchmarks.

use crate::sample::Sample;

/// Measure RMS level
#[inline]
pub fn measure_rms<S: Sample>(samples: &[S]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f64 = samples.iter().map(|s| s.as_f64() * s.as_f64()).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Measure peak level (maximum absolute value)
#[inline]
pub fn measure_peak<S: Sample>(samples: &[S]) -> f64 {
    samples
        .iter()
        .map(|s| s.as_f64().abs())
        .fold(0.0, f64::max)
}

/// Calculate gain (dB)
#[inline]
pub fn gain_db(gain: f64) -> f64 {
    if gain <= 0.0 {
        -100.0 // Very small value representing silence
    } else {
        20.0 * gain.log10()
    }
}

/// Measure RMS level (dB)
#[inline]
pub fn measure_rms_db<S: Sample>(samples: &[S]) -> f64 {
    gain_db(measure_rms(samples))
}

/// True if every sample is finite (no NaN or infinity).
pub fn all_finite<S: Sample>(samples: &[S]) -> bool {
    samples.iter().all(|s| s.is_finite())
}
