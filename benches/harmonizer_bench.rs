//! Full-engine benchmarks for the CHORALE harmonizer.
//!
//! Measures one complete block render (analysis, grain extraction, voice
//! resynthesis) at increasing polyphony.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chorale::midi::{MidiEvent, TimedEvent};
use chorale::HarmonizerEngine;

const SAMPLE_RATE: f64 = 48_000.0;
const BLOCKSIZE: usize = 512;

fn sine(frequency: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            (std::f64::consts::TAU * frequency * i as f64 / SAMPLE_RATE).sin() as f32 * 0.5
        })
        .collect()
}

fn prepared_engine(num_voices: usize, notes: &[u8]) -> HarmonizerEngine<f32> {
    let mut engine = HarmonizerEngine::new();
    engine.prepare(SAMPLE_RATE, BLOCKSIZE, num_voices).unwrap();

    let events: Vec<TimedEvent> = notes
        .iter()
        .map(|&note| TimedEvent::new(0, MidiEvent::NoteOn { note, velocity: 100 }))
        .collect();

    let input = sine(261.63, BLOCKSIZE);
    let mut left = vec![0.0f32; BLOCKSIZE];
    let mut right = vec![0.0f32; BLOCKSIZE];
    let mut midi_out = Vec::new();
    engine.process(&input, &events, &mut left, &mut right, &mut midi_out);

    engine
}

fn bench_block(c: &mut Criterion, name: &str, num_voices: usize, notes: &[u8]) {
    let mut engine = prepared_engine(num_voices, notes);
    let input = sine(261.63, BLOCKSIZE);
    let mut left = vec![0.0f32; BLOCKSIZE];
    let mut right = vec![0.0f32; BLOCKSIZE];
    let mut midi_out = Vec::new();

    c.bench_function(name, |b| {
        b.iter(|| {
            engine.process(
                black_box(&input),
                &[],
                &mut left,
                &mut right,
                &mut midi_out,
            );
            black_box(left[0]);
        })
    });
}

fn bench_render_single_voice(c: &mut Criterion) {
    bench_block(c, "harmonizer_block_1_voice", 1, &[64]);
}

fn bench_render_four_voices(c: &mut Criterion) {
    bench_block(c, "harmonizer_block_4_voices", 4, &[60, 64, 67, 72]);
}

fn bench_render_eight_voices(c: &mut Criterion) {
    bench_block(
        c,
        "harmonizer_block_8_voices",
        8,
        &[48, 55, 60, 64, 67, 72, 76, 79],
    );
}

fn bench_render_max_voices(c: &mut Criterion) {
    let notes: Vec<u8> = (48..64).collect();
    bench_block(c, "harmonizer_block_16_voices", 16, &notes);
}

fn bench_render_idle(c: &mut Criterion) {
    bench_block(c, "harmonizer_block_idle", 8, &[]);
}

fn bench_note_on_off_cycle(c: &mut Criterion) {
    let mut engine = prepared_engine(8, &[]);
    let input = sine(261.63, BLOCKSIZE);
    let mut left = vec![0.0f32; BLOCKSIZE];
    let mut right = vec![0.0f32; BLOCKSIZE];
    let mut midi_out = Vec::new();

    let on = [TimedEvent::new(0, MidiEvent::NoteOn { note: 64, velocity: 100 })];
    let off = [TimedEvent::new(0, MidiEvent::NoteOff { note: 64, velocity: 64 })];

    c.bench_function("harmonizer_note_on_off_cycle", |b| {
        b.iter(|| {
            engine.process(&input, &on, &mut left, &mut right, &mut midi_out);
            engine.process(&input, &off, &mut left, &mut right, &mut midi_out);
            black_box(left[0]);
        })
    });
}

criterion_group!(
    harmonizer_benches,
    bench_render_single_voice,
    bench_render_four_voices,
    bench_render_eight_voices,
    bench_render_max_voices,
    bench_render_idle,
    bench_note_on_off_cycle,
);

criterion_main!(harmonizer_benches);
