//! Envelope Module
//!
//! ADSR envelope generators shaping per-voice amplitude over time. Every
//! harmonizer voice carries three independent instances:
//! - `main`: the user-configurable MIDI-driven envelope (may be disabled)
//! - `quick_attack`: a fixed short attack applied when the main envelope
//!   is disabled, to avoid clicks at note starts
//! - `quick_release`: a fixed short fade applied when a note is stopped
//!   without tail-off, instead of jumping the signal to zero

use crate::sample::Sample;
use serde::{Deserialize, Serialize};

/// Enumeration of possible envelope stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    /// Envelope is idle, at zero level
    Idle,

    /// Rising to peak level
    Attack,

    /// Falling to sustain level
    Decay,

    /// Holding at sustain level
    Sustain,

    /// Fading back to zero
    Release,

    /// Envelope has finished
    Finished,
}

/// Configuration for envelope timing and levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Attack time in seconds
    pub attack: f32,

    /// Decay time in seconds
    pub decay: f32,

    /// Sustain level (0.0 to 1.0)
    pub sustain: f32,

    /// Release time in seconds
    pub release: f32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack: 0.035,
            decay: 0.06,
            sustain: 0.8,
            release: 0.01,
        }
    }
}

impl EnvelopeConfig {
    /// A quick-attack configuration: short fade-in, full sustain.
    pub fn quick_attack(milliseconds: f32) -> Self {
        Self {
            attack: milliseconds / 1000.0,
            decay: 0.0,
            sustain: 1.0,
            release: milliseconds / 1000.0,
        }
    }

    /// A quick-release configuration: instant on, short fade-out.
    pub fn quick_release(milliseconds: f32) -> Self {
        Self {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: milliseconds / 1000.0,
        }
    }

    /// True if all times are non-negative and sustain is a valid level.
    pub fn is_valid(&self) -> bool {
        self.attack >= 0.0
            && self.decay >= 0.0
            && self.release >= 0.0
            && (0.0..=1.0).contains(&self.sustain)
    }
}

/// ADSR (Attack, Decay, Sustain, Release) envelope generator.
///
/// Linear segments; release always ramps down from the level the envelope
/// held when the gate closed, so a note stopped mid-attack does not jump.
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    stage: EnvelopeStage,
    current_level: f32,

    config: EnvelopeConfig,
    sample_rate: f32,

    /// Per-sample level increments, derived from config and sample rate.
    attack_step: f32,
    decay_step: f32,
    release_step: f32,
}

impl AdsrEnvelope {
    /// Creates an envelope with the default configuration at 44.1 kHz.
    pub fn new() -> Self {
        Self::with_config(EnvelopeConfig::default(), 44_100.0)
    }

    /// Creates an envelope with a custom configuration.
    pub fn with_config(config: EnvelopeConfig, sample_rate: f32) -> Self {
        let mut envelope = Self {
            stage: EnvelopeStage::Idle,
            current_level: 0.0,
            config,
            sample_rate,
            attack_step: 0.0,
            decay_step: 0.0,
            release_step: 0.0,
        };
        envelope.recalculate_steps();
        envelope
    }

    /// Opens the gate: restarts the attack from the current level.
    pub fn note_on(&mut self) {
        if self.config.attack * self.sample_rate >= 1.0 {
            self.stage = EnvelopeStage::Attack;
        } else {
            self.current_level = 1.0;
            self.stage = if self.config.decay * self.sample_rate >= 1.0 {
                EnvelopeStage::Decay
            } else {
                self.current_level = self.config.sustain;
                EnvelopeStage::Sustain
            };
        }
    }

    /// Closes the gate: fades out from the current level over the
    /// configured release time.
    pub fn note_off(&mut self) {
        if !self.is_active() || self.stage == EnvelopeStage::Release {
            return;
        }

        let release_samples = self.config.release * self.sample_rate;
        if release_samples >= 1.0 {
            self.release_step = self.current_level / release_samples;
            self.stage = EnvelopeStage::Release;
        } else {
            self.current_level = 0.0;
            self.stage = EnvelopeStage::Finished;
        }
    }

    /// Advances one sample and returns the current gain level.
    pub fn process(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle | EnvelopeStage::Finished => {
                self.current_level = 0.0;
            }

            EnvelopeStage::Attack => {
                self.current_level += self.attack_step;
                if self.current_level >= 1.0 {
                    self.current_level = 1.0;
                    self.stage = if self.config.decay * self.sample_rate >= 1.0 {
                        EnvelopeStage::Decay
                    } else {
                        self.current_level = self.config.sustain;
                        EnvelopeStage::Sustain
                    };
                }
            }

            EnvelopeStage::Decay => {
                self.current_level -= self.decay_step;
                if self.current_level <= self.config.sustain {
                    self.current_level = self.config.sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }

            EnvelopeStage::Sustain => {
                self.current_level = self.config.sustain;
            }

            EnvelopeStage::Release => {
                self.current_level -= self.release_step;
                if self.current_level <= 0.0 {
                    self.current_level = 0.0;
                    self.stage = EnvelopeStage::Finished;
                }
            }
        }

        self.current_level
    }

    /// Multiplies `buffer` by the envelope, advancing one sample per slot.
    pub fn apply_to_buffer<S: Sample>(&mut self, buffer: &mut [S]) {
        for slot in buffer.iter_mut() {
            *slot = *slot * S::coerce32(self.process());
        }
    }

    /// Gets the current envelope stage.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Checks if the envelope is still active (not idle or finished).
    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle && self.stage != EnvelopeStage::Finished
    }

    /// Resets the envelope to idle.
    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.current_level = 0.0;
    }

    /// Replaces the timing configuration, keeping the current stage.
    pub fn set_config(&mut self, config: EnvelopeConfig) {
        self.config = config;
        self.recalculate_steps();
    }

    /// Current timing configuration.
    pub fn config(&self) -> EnvelopeConfig {
        self.config
    }

    /// Changes the sample rate, preserving configured times in seconds.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recalculate_steps();
    }

    fn recalculate_steps(&mut self) {
        let attack_samples = self.config.attack * self.sample_rate;
        self.attack_step = if attack_samples >= 1.0 {
            1.0 / attack_samples
        } else {
            1.0
        };

        let decay_samples = self.config.decay * self.sample_rate;
        self.decay_step = if decay_samples >= 1.0 {
            (1.0 - self.config.sustain) / decay_samples
        } else {
            1.0
        };

        let release_samples = self.config.release * self.sample_rate;
        self.release_step = if release_samples >= 1.0 {
            self.config.sustain / release_samples
        } else {
            1.0
        };
    }
}

impl Default for AdsrEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_default() {
        let envelope = AdsrEnvelope::new();
        assert_eq!(envelope.stage(), EnvelopeStage::Idle);
        assert!(!envelope.is_active());
    }

    #[test]
    fn test_envelope_note_on() {
        let mut envelope = AdsrEnvelope::new();
        envelope.note_on();
        assert_eq!(envelope.stage(), EnvelopeStage::Attack);
        assert!(envelope.is_active());
    }

    #[test]
    fn test_attack_reaches_peak_then_sustain() {
        let config = EnvelopeConfig {
            attack: 0.01,
            decay: 0.01,
            sustain: 0.5,
            release: 0.01,
        };
        let mut envelope = AdsrEnvelope::with_config(config, 1000.0);
        envelope.note_on();

        let mut peak = 0.0f32;
        for _ in 0..100 {
            peak = peak.max(envelope.process());
        }
        assert!((peak - 1.0).abs() < 0.01, "peak was {}", peak);
        assert_eq!(envelope.stage(), EnvelopeStage::Sustain);
        assert!((envelope.process() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_release_completes() {
        let config = EnvelopeConfig {
            attack: 0.001,
            decay: 0.001,
            sustain: 0.8,
            release: 0.01,
        };
        let mut envelope = AdsrEnvelope::with_config(config, 1000.0);
        envelope.note_on();
        for _ in 0..20 {
            envelope.process();
        }

        envelope.note_off();
        assert_eq!(envelope.stage(), EnvelopeStage::Release);

        for _ in 0..20 {
            envelope.process();
        }
        assert_eq!(envelope.stage(), EnvelopeStage::Finished);
        assert!(!envelope.is_active());
        assert_eq!(envelope.process(), 0.0);
    }

    #[test]
    fn test_release_ramps_from_current_level() {
        // Stop a note mid-attack: the release must start from the partial
        // level, not from the sustain level.
        let config = EnvelopeConfig {
            attack: 0.1,
            decay: 0.01,
            sustain: 1.0,
            release: 0.01,
        };
        let mut envelope = AdsrEnvelope::with_config(config, 1000.0);
        envelope.note_on();

        for _ in 0..10 {
            envelope.process(); // ~10% into the attack
        }
        let level_at_gate_close = envelope.process();
        envelope.note_off();

        let first_release_level = envelope.process();
        assert!(
            first_release_level <= level_at_gate_close,
            "release should descend from {}",
            level_at_gate_close
        );
        assert!(
            first_release_level > level_at_gate_close * 0.5,
            "release must not jump: {} from {}",
            first_release_level,
            level_at_gate_close
        );
    }

    #[test]
    fn test_quick_release_config() {
        let mut envelope = AdsrEnvelope::with_config(EnvelopeConfig::quick_release(5.0), 48_000.0);
        envelope.note_on();

        // Instant attack: full level on the first sample.
        assert!((envelope.process() - 1.0).abs() < 1e-6);

        envelope.note_off();
        let mut samples = 0;
        while envelope.is_active() && samples < 1000 {
            envelope.process();
            samples += 1;
        }

        // 5 ms at 48 kHz = 240 samples.
        assert!(
            (200..=280).contains(&samples),
            "quick release took {} samples",
            samples
        );
    }

    #[test]
    fn test_apply_to_buffer() {
        let mut envelope = AdsrEnvelope::with_config(EnvelopeConfig::quick_release(5.0), 48_000.0);
        envelope.note_on();

        let mut buffer = vec![1.0f32; 16];
        envelope.apply_to_buffer(&mut buffer);
        assert!(buffer.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_envelope_reset() {
        let mut envelope = AdsrEnvelope::new();
        envelope.note_on();
        envelope.process();
        envelope.reset();
        assert_eq!(envelope.stage(), EnvelopeStage::Idle);
        assert_eq!(envelope.process(), 0.0);
    }

    #[test]
    fn test_zero_attack_jumps_to_sustain() {
        let config = EnvelopeConfig {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.005,
        };
        let mut envelope = AdsrEnvelope::with_config(config, 48_000.0);
        envelope.note_on();
        assert_eq!(envelope.stage(), EnvelopeStage::Sustain);
        assert!((envelope.process() - 1.0).abs() < 1e-6);
    }
}
