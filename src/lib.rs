//! CHORALE - Real-Time Vocal Harmonizer Engine
//!
//! This crate provides the core DSP engine for CHORALE, a polyphonic
//! pitch-shifting harmonizer: it analyzes a monophonic pitched input (a
//! voice), detects its fundamental frequency, and resynthesizes up to
//! sixteen pitch-shifted copies at MIDI-driven target pitches.
//!
//! # Architecture
//!
//! The engine consists of several interconnected modules:
//! - **Pitch**: time-domain fundamental frequency estimation (ASDF)
//! - **Grains**: pitch-synchronous analysis grain extraction (PSOLA)
//! - **Voice**: one monophonic overlap-add resynthesis stream
//! - **Harmonizer**: the polyphonic voice bank with its MIDI layer
//!   (latch, interval latch, pedal pitch, descant, voice stealing)
//! - **Engine**: the host-facing facade (prepare / process / release)
//!
//! # Example
//!
//! ```rust
//! use chorale::HarmonizerEngine;
//! use chorale::midi::{MidiEvent, TimedEvent};
//!
//! let mut engine: HarmonizerEngine<f32> = HarmonizerEngine::new();
//! engine.prepare(48_000.0, 512, 8).unwrap();
//!
//! let input = vec![0.0f32; 512];
//! let midi_in = [TimedEvent::new(0, MidiEvent::NoteOn { note: 69, velocity: 100 })];
//! let (mut left, mut right) = (vec![0.0f32; 512], vec![0.0f32; 512]);
//! let mut midi_out = Vec::new();
//!
//! engine.process(&input, &midi_in, &mut left, &mut right, &mut midi_out);
//! ```

pub mod analysis;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod grains;
pub mod harmonizer;
pub mod midi;
pub mod panning;
pub mod pitch;
pub mod ring_buffer;
pub mod sample;
pub mod voice;

pub use engine::{EngineConfig, HarmonizerEngine};
pub use envelope::{AdsrEnvelope, EnvelopeConfig, EnvelopeStage};
pub use error::ConfigError;
pub use grains::GrainExtractor;
pub use harmonizer::Harmonizer;
pub use midi::{MidiEvent, TimedEvent};
pub use pitch::{PitchDetector, PitchEstimate};
pub use sample::Sample;
