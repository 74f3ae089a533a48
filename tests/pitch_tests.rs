// Pitch detection integration tests: accuracy on clean tones, gating on
// noise, and the period-range invariant under block-by-block streaming.

mod common;

use chorale::pitch::{PitchDetector, PitchEstimate};
use common::*;

const SAMPLE_RATE: f64 = 48_000.0;
const BLOCKSIZE: usize = 1024;

fn detector() -> PitchDetector<f32> {
    PitchDetector::new(50.0, 2000.0, SAMPLE_RATE).unwrap()
}

#[test]
fn test_streamed_sine_tracks_within_one_percent() {
    let mut detector = detector();

    for frequency in [82.4, 110.0, 261.63, 440.0, 880.0] {
        detector.reset();

        let mut voiced_blocks = 0;
        for block_index in 0..6 {
            let block = sine_block(
                frequency,
                SAMPLE_RATE,
                0.5,
                block_index * BLOCKSIZE,
                BLOCKSIZE,
            );

            if let PitchEstimate::Voiced { hz, .. } = detector.detect_pitch(&block) {
                voiced_blocks += 1;
                if block_index >= 2 {
                    let error = (hz as f64 - frequency).abs() / frequency;
                    assert!(
                        error < 0.01,
                        "{} Hz sine detected as {} Hz (error {:.3})",
                        frequency,
                        hz,
                        error
                    );
                }
            }
        }

        assert!(
            voiced_blocks >= 4,
            "{} Hz sine was voiced in only {}/6 blocks",
            frequency,
            voiced_blocks
        );
    }
}

#[test]
fn test_white_noise_is_mostly_unvoiced() {
    let mut detector = detector();
    let mut rng = seeded_rng(42);

    let total = 40;
    let mut unvoiced = 0;
    for _ in 0..total {
        let block = noise_block(&mut rng, 1.0, BLOCKSIZE);
        if !detector.detect_pitch(&block).is_voiced() {
            unvoiced += 1;
        }
    }

    assert!(
        unvoiced * 10 >= total * 9,
        "only {}/{} noise blocks gated as unvoiced",
        unvoiced,
        total
    );
}

#[test]
fn test_voiced_period_always_in_configured_range() {
    let mut detector = detector();
    let mut rng = seeded_rng(1234);

    // Alternate tones, noise, and silence; the invariant must hold on
    // every voiced estimate regardless of input.
    for block_index in 0..30 {
        let block = match block_index % 3 {
            0 => sine_block(220.0, SAMPLE_RATE, 0.5, block_index * BLOCKSIZE, BLOCKSIZE),
            1 => noise_block(&mut rng, 0.8, BLOCKSIZE),
            _ => vec![0.0f32; BLOCKSIZE],
        };

        if let PitchEstimate::Voiced { period, hz } = detector.detect_pitch(&block) {
            assert!(period >= detector.min_period() as f64);
            assert!(period <= detector.max_period() as f64);
            assert!(hz > 0.0);
        }
    }
}

#[test]
fn test_octave_hysteresis_between_voiced_frames() {
    let mut detector = detector();

    // Establish 220 Hz, then feed one 880 Hz block: the estimate may
    // move, but never past double the previous period's pitch bound.
    for block_index in 0..4 {
        let block = sine_block(220.0, SAMPLE_RATE, 0.5, block_index * BLOCKSIZE, BLOCKSIZE);
        detector.detect_pitch(&block);
    }

    let jump = sine_block(880.0, SAMPLE_RATE, 0.5, 0, BLOCKSIZE);
    if let PitchEstimate::Voiced { hz, .. } = detector.detect_pitch(&jump) {
        assert!(
            (hz - 440.0).abs() < 20.0 || (hz - 880.0).abs() < 20.0,
            "post-jump estimate {} Hz is neither the octave bound nor the target",
            hz
        );
    }
}

#[test]
fn test_low_frequency_needs_longer_blocks() {
    // A 60 Hz fundamental (period 800) cannot be measured in a 512
    // sample block; the detector must decline rather than guess.
    let mut detector = detector();
    let block = sine_block(60.0, SAMPLE_RATE, 0.5, 0, 512);
    let estimate = detector.detect_pitch(&block);

    if let PitchEstimate::Voiced { period, .. } = estimate {
        assert!(period < 512.0, "period {} cannot fit the block", period);
    }
}

#[test]
fn test_range_reconfiguration_resizes_cleanly() {
    let mut detector = detector();
    detector.set_hz_range(80.0, 1000.0).unwrap();
    assert_eq!(detector.max_period(), 600); // 48000 / 80
    assert_eq!(detector.min_period(), 48); // 48000 / 1000

    let block = sine_block(440.0, SAMPLE_RATE, 0.5, 0, BLOCKSIZE);
    let hz = detector.detect_pitch(&block).hz().unwrap();
    assert_approx_eq(hz, 440.0, 5.0);
}
