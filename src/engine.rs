//! Engine Module
//!
//! The host-facing facade around the harmonizer core: prepare / process /
//! release / reset, plus the full configuration surface with validation.
//! The engine persists nothing itself; [`EngineConfig`] is a serializable
//! snapshot of every settable value for hosts that do.

use crate::envelope::EnvelopeConfig;
use crate::error::ConfigError;
use crate::harmonizer::{AutoHarmonySettings, Harmonizer};
use crate::midi::TimedEvent;
use crate::sample::Sample;
use serde::{Deserialize, Serialize};

/// A snapshot of the full configuration surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub num_voices: usize,
    pub concert_pitch_hz: u16,

    pub pitch_detection_min_hz: f32,
    pub pitch_detection_max_hz: f32,
    pub pitch_confidence_upper: f32,
    pub pitch_confidence_lower: f32,

    pub stereo_width: u8,
    pub lowest_panned_note: u8,

    pub adsr: EnvelopeConfig,
    pub adsr_enabled: bool,
    pub quick_attack_ms: f32,
    pub quick_release_ms: f32,

    pub velocity_sensitivity: u8,
    pub pitchbend_range_up: u8,
    pub pitchbend_range_down: u8,

    pub pedal_pitch: AutoHarmonySettings,
    pub descant: AutoHarmonySettings,

    pub latch: bool,
    pub interval_latch: bool,
    pub note_stealing: bool,

    pub soft_pedal_multiplier: f32,
    pub playing_but_released_multiplier: f32,
    pub aftertouch_gain: bool,

    pub unvoiced_period_min: usize,
    pub unvoiced_period_max: usize,
    pub unvoiced_polarity_flip: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_voices: 8,
            concert_pitch_hz: 440,
            pitch_detection_min_hz: 50.0,
            pitch_detection_max_hz: 2000.0,
            pitch_confidence_upper: 0.15,
            pitch_confidence_lower: 0.05,
            stereo_width: 64,
            lowest_panned_note: 0,
            adsr: EnvelopeConfig::default(),
            adsr_enabled: true,
            quick_attack_ms: 15.0,
            quick_release_ms: 5.0,
            velocity_sensitivity: 100,
            pitchbend_range_up: 2,
            pitchbend_range_down: 2,
            pedal_pitch: AutoHarmonySettings {
                enabled: false,
                threshold: 0,
                interval: 12,
            },
            descant: AutoHarmonySettings {
                enabled: false,
                threshold: 127,
                interval: 12,
            },
            latch: false,
            interval_latch: false,
            note_stealing: true,
            soft_pedal_multiplier: 0.65,
            playing_but_released_multiplier: 0.4,
            aftertouch_gain: false,
            unvoiced_period_min: 24,
            unvoiced_period_max: 60,
            unvoiced_polarity_flip: true,
        }
    }
}

/// The real-time harmonizer engine.
///
/// All buffers are allocated by [`prepare`](Self::prepare) and reused;
/// [`process`](Self::process) performs no allocation, blocking or I/O.
/// Configuration setters belong on the control thread, between blocks.
#[derive(Debug, Clone)]
pub struct HarmonizerEngine<S: Sample> {
    harmonizer: Harmonizer<S>,
    blocksize: usize,
    prepared: bool,
}

impl<S: Sample> HarmonizerEngine<S> {
    pub fn new() -> Self {
        Self {
            harmonizer: Harmonizer::new(),
            blocksize: 0,
            prepared: false,
        }
    }

    /// Creates an engine and applies a configuration snapshot.
    pub fn with_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut engine = Self::new();
        engine.apply_config(config)?;
        Ok(engine)
    }

    /// Allocates all buffers for the host format. `num_voices` in
    /// [1, 16], `blocksize` >= 32.
    pub fn prepare(
        &mut self,
        samplerate: f64,
        blocksize: usize,
        num_voices: usize,
    ) -> Result<(), ConfigError> {
        self.harmonizer.prepare(samplerate, blocksize, num_voices)?;
        self.blocksize = blocksize;
        self.prepared = true;
        Ok(())
    }

    /// Renders one block. `input` is the mono analysis block; the stereo
    /// result is written (not mixed) into `out_left` / `out_right`;
    /// `midi_out` receives the aggregate MIDI record for the block.
    ///
    /// Mismatched buffer lengths are clamped to the prepared blocksize.
    pub fn process(
        &mut self,
        input: &[S],
        midi_in: &[TimedEvent],
        out_left: &mut [S],
        out_right: &mut [S],
        midi_out: &mut Vec<TimedEvent>,
    ) {
        for slot in out_left.iter_mut() {
            *slot = S::zero();
        }
        for slot in out_right.iter_mut() {
            *slot = S::zero();
        }
        midi_out.clear();

        if !self.prepared {
            log::warn!("process called before prepare; emitting silence");
            return;
        }

        debug_assert_eq!(input.len(), self.blocksize);
        if input.len() != self.blocksize {
            log::warn!(
                "block length {} does not match prepared blocksize {}; clamping",
                input.len(),
                self.blocksize
            );
        }

        self.harmonizer
            .render_block(input, midi_in, out_left, out_right, midi_out);
    }

    /// Frees all buffers. `prepare` must run again before processing.
    pub fn release(&mut self) {
        self.harmonizer.release_resources();
        self.blocksize = 0;
        self.prepared = false;
    }

    /// Clears playback state but keeps configuration and buffers.
    pub fn reset(&mut self) {
        self.harmonizer.reset();
        log::debug!("engine reset");
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    /// Direct access to the harmonizer core.
    pub fn harmonizer(&self) -> &Harmonizer<S> {
        &self.harmonizer
    }

    pub fn harmonizer_mut(&mut self) -> &mut Harmonizer<S> {
        &mut self.harmonizer
    }

    // Configuration surface ---------------------------------------------

    pub fn set_num_voices(&mut self, num_voices: usize) -> Result<(), ConfigError> {
        self.harmonizer.change_num_voices(num_voices)
    }

    pub fn num_voices(&self) -> usize {
        self.harmonizer.num_voices()
    }

    pub fn num_active_voices(&self) -> usize {
        self.harmonizer.num_active_voices()
    }

    pub fn set_concert_pitch_hz(&mut self, hz: u16) {
        self.harmonizer.set_concert_pitch_hz(hz);
    }

    pub fn concert_pitch_hz(&self) -> u16 {
        self.harmonizer.pitch_converter.concert_pitch_hz()
    }

    pub fn set_pitch_detection_range(&mut self, min_hz: f32, max_hz: f32) -> Result<(), ConfigError> {
        self.harmonizer.set_pitch_detection_range(min_hz, max_hz)
    }

    pub fn pitch_detection_range(&self) -> (f32, f32) {
        self.harmonizer.pitch_detector.hz_range()
    }

    pub fn set_pitch_detection_confidence(&mut self, upper: f32, lower: f32) -> Result<(), ConfigError> {
        self.harmonizer.set_pitch_detection_confidence(upper, lower)
    }

    pub fn pitch_detection_confidence(&self) -> (f32, f32) {
        self.harmonizer.pitch_detector.confidence_thresh()
    }

    pub fn set_stereo_width(&mut self, width: u8) -> Result<(), ConfigError> {
        self.harmonizer.set_stereo_width(width)
    }

    pub fn stereo_width(&self) -> u8 {
        self.harmonizer.panner.stereo_width()
    }

    pub fn set_lowest_panned_note(&mut self, note: u8) {
        self.harmonizer.set_lowest_panned_note(note);
    }

    pub fn lowest_panned_note(&self) -> u8 {
        self.harmonizer.lowest_panned_note
    }

    pub fn set_adsr(
        &mut self,
        attack_s: f32,
        decay_s: f32,
        sustain_ratio: f32,
        release_s: f32,
        enabled: bool,
    ) -> Result<(), ConfigError> {
        self.harmonizer.set_adsr(
            EnvelopeConfig {
                attack: attack_s,
                decay: decay_s,
                sustain: sustain_ratio,
                release: release_s,
            },
            enabled,
        )
    }

    pub fn adsr(&self) -> (EnvelopeConfig, bool) {
        (self.harmonizer.adsr_config, self.harmonizer.adsr_enabled)
    }

    pub fn set_quick_attack_ms(&mut self, milliseconds: f32) -> Result<(), ConfigError> {
        self.harmonizer.set_quick_attack_ms(milliseconds)
    }

    pub fn quick_attack_ms(&self) -> f32 {
        self.harmonizer.quick_attack_ms
    }

    pub fn set_quick_release_ms(&mut self, milliseconds: f32) -> Result<(), ConfigError> {
        self.harmonizer.set_quick_release_ms(milliseconds)
    }

    pub fn quick_release_ms(&self) -> f32 {
        self.harmonizer.quick_release_ms
    }

    pub fn set_velocity_sensitivity(&mut self, sensitivity: u8) {
        self.harmonizer.set_velocity_sensitivity(sensitivity);
    }

    pub fn velocity_sensitivity(&self) -> u8 {
        self.harmonizer.velocity_mapper.sensitivity()
    }

    pub fn set_pitchbend_range(&mut self, up_semitones: u8, down_semitones: u8) {
        self.harmonizer.set_pitchbend_range(up_semitones, down_semitones);
    }

    pub fn pitchbend_range(&self) -> (u8, u8) {
        self.harmonizer.bend_tracker.range()
    }

    pub fn set_pedal_pitch(&mut self, enabled: bool, upper_threshold: u8, interval: u8) {
        self.harmonizer.set_pedal_pitch(enabled, upper_threshold, interval);
    }

    pub fn pedal_pitch(&self) -> AutoHarmonySettings {
        self.harmonizer.pedal_pitch_settings()
    }

    pub fn set_descant(&mut self, enabled: bool, lower_threshold: u8, interval: u8) {
        self.harmonizer.set_descant(enabled, lower_threshold, interval);
    }

    pub fn descant(&self) -> AutoHarmonySettings {
        self.harmonizer.descant_settings()
    }

    pub fn set_latch(&mut self, enabled: bool) {
        self.harmonizer.set_latch(enabled);
    }

    pub fn latch(&self) -> bool {
        self.harmonizer.is_latched()
    }

    pub fn set_interval_latch(&mut self, enabled: bool) {
        self.harmonizer.set_interval_latch(enabled);
    }

    pub fn interval_latch(&self) -> bool {
        self.harmonizer.is_interval_latch_on()
    }

    pub fn set_note_stealing(&mut self, enabled: bool) {
        self.harmonizer.set_note_stealing(enabled);
    }

    pub fn note_stealing(&self) -> bool {
        self.harmonizer.note_stealing_enabled
    }

    pub fn set_soft_pedal_multiplier(&mut self, multiplier: f32) {
        self.harmonizer.set_soft_pedal_multiplier(multiplier);
    }

    pub fn soft_pedal_multiplier(&self) -> f32 {
        self.harmonizer.soft_pedal_multiplier
    }

    pub fn set_playing_but_released_multiplier(&mut self, multiplier: f32) {
        self.harmonizer.set_playing_but_released_multiplier(multiplier);
    }

    pub fn playing_but_released_multiplier(&self) -> f32 {
        self.harmonizer.playing_but_released_multiplier
    }

    pub fn set_aftertouch_gain_enabled(&mut self, enabled: bool) {
        self.harmonizer.set_aftertouch_gain_enabled(enabled);
    }

    pub fn aftertouch_gain_enabled(&self) -> bool {
        self.harmonizer.aftertouch_gain_enabled
    }

    pub fn set_unvoiced_period_range(&mut self, min: usize, max: usize) -> Result<(), ConfigError> {
        self.harmonizer.set_unvoiced_period_range(min, max)
    }

    pub fn unvoiced_period_range(&self) -> (usize, usize) {
        (
            self.harmonizer.unvoiced_period_min,
            self.harmonizer.unvoiced_period_max,
        )
    }

    pub fn set_unvoiced_polarity_flip(&mut self, enabled: bool) {
        self.harmonizer.set_unvoiced_polarity_flip(enabled);
    }

    pub fn unvoiced_polarity_flip(&self) -> bool {
        self.harmonizer.unvoiced_polarity_flip
    }

    /// Reseeds the unvoiced-frame randomizer, for reproducible renders.
    pub fn set_rng_seed(&mut self, seed: u64) {
        self.harmonizer.set_rng_seed(seed);
    }

    /// Captures the whole configuration surface.
    pub fn config(&self) -> EngineConfig {
        let (adsr, adsr_enabled) = self.adsr();
        let (upper, lower) = self.pitch_detection_confidence();
        let (min_hz, max_hz) = self.pitch_detection_range();
        let (bend_up, bend_down) = self.pitchbend_range();
        let (unvoiced_min, unvoiced_max) = self.unvoiced_period_range();

        EngineConfig {
            num_voices: self.num_voices().max(1),
            concert_pitch_hz: self.concert_pitch_hz(),
            pitch_detection_min_hz: min_hz,
            pitch_detection_max_hz: max_hz,
            pitch_confidence_upper: upper,
            pitch_confidence_lower: lower,
            stereo_width: self.stereo_width(),
            lowest_panned_note: self.lowest_panned_note(),
            adsr,
            adsr_enabled,
            quick_attack_ms: self.quick_attack_ms(),
            quick_release_ms: self.quick_release_ms(),
            velocity_sensitivity: self.velocity_sensitivity(),
            pitchbend_range_up: bend_up,
            pitchbend_range_down: bend_down,
            pedal_pitch: self.pedal_pitch(),
            descant: self.descant(),
            latch: self.latch(),
            interval_latch: self.interval_latch(),
            note_stealing: self.note_stealing(),
            soft_pedal_multiplier: self.soft_pedal_multiplier(),
            playing_but_released_multiplier: self.playing_but_released_multiplier(),
            aftertouch_gain: self.aftertouch_gain_enabled(),
            unvoiced_period_min: unvoiced_min,
            unvoiced_period_max: unvoiced_max,
            unvoiced_polarity_flip: self.unvoiced_polarity_flip(),
        }
    }

    /// Applies a configuration snapshot. Stops at the first invalid
    /// value, leaving earlier fields applied.
    pub fn apply_config(&mut self, config: &EngineConfig) -> Result<(), ConfigError> {
        self.set_num_voices(config.num_voices)?;
        self.set_concert_pitch_hz(config.concert_pitch_hz);
        self.set_pitch_detection_range(
            config.pitch_detection_min_hz,
            config.pitch_detection_max_hz,
        )?;
        self.set_pitch_detection_confidence(
            config.pitch_confidence_upper,
            config.pitch_confidence_lower,
        )?;
        self.set_stereo_width(config.stereo_width)?;
        self.set_lowest_panned_note(config.lowest_panned_note);
        self.set_adsr(
            config.adsr.attack,
            config.adsr.decay,
            config.adsr.sustain,
            config.adsr.release,
            config.adsr_enabled,
        )?;
        self.set_quick_attack_ms(config.quick_attack_ms)?;
        self.set_quick_release_ms(config.quick_release_ms)?;
        self.set_velocity_sensitivity(config.velocity_sensitivity);
        self.set_pitchbend_range(config.pitchbend_range_up, config.pitchbend_range_down);
        self.set_pedal_pitch(
            config.pedal_pitch.enabled,
            config.pedal_pitch.threshold,
            config.pedal_pitch.interval,
        );
        self.set_descant(
            config.descant.enabled,
            config.descant.threshold,
            config.descant.interval,
        );
        self.set_latch(config.latch);
        self.set_interval_latch(config.interval_latch);
        self.set_note_stealing(config.note_stealing);
        self.set_soft_pedal_multiplier(config.soft_pedal_multiplier);
        self.set_playing_but_released_multiplier(config.playing_but_released_multiplier);
        self.set_aftertouch_gain_enabled(config.aftertouch_gain);
        self.set_unvoiced_period_range(config.unvoiced_period_min, config.unvoiced_period_max)?;
        self.set_unvoiced_polarity_flip(config.unvoiced_polarity_flip);
        Ok(())
    }
}

impl<S: Sample> Default for HarmonizerEngine<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_validates_arguments() {
        let mut engine: HarmonizerEngine<f32> = HarmonizerEngine::new();
        assert_eq!(
            engine.prepare(48_000.0, 16, 4),
            Err(ConfigError::InvalidBlocksize(16))
        );
        assert_eq!(
            engine.prepare(48_000.0, 512, 0),
            Err(ConfigError::InvalidVoiceCount(0))
        );
        assert_eq!(
            engine.prepare(48_000.0, 512, 17),
            Err(ConfigError::InvalidVoiceCount(17))
        );
        assert!(engine.prepare(48_000.0, 512, 8).is_ok());
        assert!(engine.is_prepared());
    }

    #[test]
    fn test_rejected_setter_leaves_state_intact() {
        let mut engine: HarmonizerEngine<f32> = HarmonizerEngine::new();
        engine.prepare(48_000.0, 512, 8).unwrap();

        let before = engine.pitch_detection_range();
        assert!(engine.set_pitch_detection_range(2000.0, 50.0).is_err());
        assert_eq!(engine.pitch_detection_range(), before);

        assert!(engine.set_stereo_width(101).is_err());
        assert_eq!(engine.stereo_width(), 64);
    }

    #[test]
    fn test_unprepared_process_is_silent() {
        let mut engine: HarmonizerEngine<f32> = HarmonizerEngine::new();
        let input = vec![0.5f32; 256];
        let mut left = vec![1.0f32; 256];
        let mut right = vec![1.0f32; 256];
        let mut midi_out = Vec::new();

        engine.process(&input, &[], &mut left, &mut right, &mut midi_out);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_config_round_trip_through_serde() {
        let mut engine: HarmonizerEngine<f32> = HarmonizerEngine::new();
        engine.prepare(48_000.0, 512, 8).unwrap();
        engine.set_stereo_width(87).unwrap();
        engine.set_pedal_pitch(true, 60, 12);
        engine.set_velocity_sensitivity(42);

        let snapshot = engine.config();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, restored);

        let mut second: HarmonizerEngine<f32> = HarmonizerEngine::with_config(&restored).unwrap();
        second.prepare(48_000.0, 512, restored.num_voices).unwrap();
        assert_eq!(second.stereo_width(), 87);
        assert_eq!(second.velocity_sensitivity(), 42);
        assert!(second.pedal_pitch().enabled);
    }

    #[test]
    fn test_getters_reflect_setters() {
        let mut engine: HarmonizerEngine<f64> = HarmonizerEngine::new();
        engine.prepare(44_100.0, 256, 4).unwrap();

        engine.set_concert_pitch_hz(442);
        assert_eq!(engine.concert_pitch_hz(), 442);

        engine.set_pitchbend_range(5, 3);
        assert_eq!(engine.pitchbend_range(), (5, 3));

        engine.set_unvoiced_period_range(30, 50).unwrap();
        assert_eq!(engine.unvoiced_period_range(), (30, 50));

        engine.set_adsr(0.01, 0.05, 1.0, 0.05, true).unwrap();
        let (adsr, enabled) = engine.adsr();
        assert!(enabled);
        assert_eq!(adsr.sustain, 1.0);
    }
}
