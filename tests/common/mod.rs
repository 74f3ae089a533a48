// Test utilities and signal generators for CHORALE engine tests.

#![allow(dead_code)] // Not every helper is used by every test binary.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

pub use chorale::analysis::{all_finite, measure_rms};

/// Generates one block of a sine wave, phase-continuous with `offset`.
///
/// # Arguments
/// * `frequency` - Frequency in Hz
/// * `sample_rate` - Sample rate in Hz
/// * `amplitude` - Signal amplitude
/// * `offset` - Index of the block's first sample in the whole signal
/// * `num_samples` - Block length
pub fn sine_block(
    frequency: f64,
    sample_rate: f64,
    amplitude: f64,
    offset: usize,
    num_samples: usize,
) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = (offset + i) as f64 / sample_rate;
            (TAU * frequency * t).sin() as f32 * amplitude as f32
        })
        .collect()
}

/// Generates one block of uniform white noise from a seeded generator.
pub fn noise_block(rng: &mut StdRng, amplitude: f32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|_| (rng.gen::<f32>() * 2.0 - 1.0) * amplitude)
        .collect()
}

/// A deterministic noise generator for reproducible tests.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Asserts that every sample is finite (no NaN or infinity).
pub fn assert_samples_are_finite(samples: &[f32]) {
    assert!(
        all_finite(samples),
        "signal contains NaN or infinite samples"
    );
}

/// Asserts that two floating point values are approximately equal.
pub fn assert_approx_eq(actual: f32, expected: f32, epsilon: f32) {
    assert!(
        (actual - expected).abs() <= epsilon,
        "values not approximately equal: actual = {}, expected = {}, epsilon = {}",
        actual,
        expected,
        epsilon
    );
}
