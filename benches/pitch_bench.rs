//! Pitch detection benchmarks for the CHORALE engine.
//!
//! Measures one ASDF analysis pass per block at several block sizes and
//! detection ranges.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chorale::pitch::PitchDetector;

const SAMPLE_RATE: f64 = 48_000.0;

fn sine(frequency: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            (std::f64::consts::TAU * frequency * i as f64 / SAMPLE_RATE).sin() as f32 * 0.5
        })
        .collect()
}

fn bench_detect_512(c: &mut Criterion) {
    let mut detector: PitchDetector<f32> = PitchDetector::new(50.0, 2000.0, SAMPLE_RATE).unwrap();
    let block = sine(440.0, 512);

    c.bench_function("pitch_detect_512", |b| {
        b.iter(|| black_box(detector.detect_pitch(black_box(&block))))
    });
}

fn bench_detect_1024(c: &mut Criterion) {
    let mut detector: PitchDetector<f32> = PitchDetector::new(50.0, 2000.0, SAMPLE_RATE).unwrap();
    let block = sine(220.0, 1024);

    c.bench_function("pitch_detect_1024", |b| {
        b.iter(|| black_box(detector.detect_pitch(black_box(&block))))
    });
}

fn bench_detect_2048(c: &mut Criterion) {
    let mut detector: PitchDetector<f32> = PitchDetector::new(50.0, 2000.0, SAMPLE_RATE).unwrap();
    let block = sine(110.0, 2048);

    c.bench_function("pitch_detect_2048", |b| {
        b.iter(|| black_box(detector.detect_pitch(black_box(&block))))
    });
}

fn bench_detect_narrow_range(c: &mut Criterion) {
    let mut detector: PitchDetector<f32> = PitchDetector::new(80.0, 800.0, SAMPLE_RATE).unwrap();
    let block = sine(220.0, 1024);

    c.bench_function("pitch_detect_narrow_range", |b| {
        b.iter(|| black_box(detector.detect_pitch(black_box(&block))))
    });
}

fn bench_detect_unvoiced(c: &mut Criterion) {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);

    let mut detector: PitchDetector<f32> = PitchDetector::new(50.0, 2000.0, SAMPLE_RATE).unwrap();
    let block: Vec<f32> = (0..1024).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();

    c.bench_function("pitch_detect_unvoiced", |b| {
        b.iter(|| black_box(detector.detect_pitch(black_box(&block))))
    });
}

fn bench_detect_f64(c: &mut Criterion) {
    let mut detector: PitchDetector<f64> = PitchDetector::new(50.0, 2000.0, SAMPLE_RATE).unwrap();
    let block: Vec<f64> = sine(440.0, 1024).iter().map(|&s| s as f64).collect();

    c.bench_function("pitch_detect_f64", |b| {
        b.iter(|| black_box(detector.detect_pitch(black_box(&block))))
    });
}

criterion_group!(
    pitch_benches,
    bench_detect_512,
    bench_detect_1024,
    bench_detect_2048,
    bench_detect_narrow_range,
    bench_detect_unvoiced,
    bench_detect_f64,
);

criterion_main!(pitch_benches);
