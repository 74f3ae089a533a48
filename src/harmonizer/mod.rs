//! Harmonizer Module
//!
//! The polyphonic core: couples the pitch analyzer and grain extractor to
//! a bank of up to sixteen resynthesis voices, and owns the MIDI layer
//! that drives them (allocation and stealing, latch, interval latch,
//! pedal pitch, descant, pedals, pitch wheel).
//!
//! One call to [`render_block`](Harmonizer::render_block) consumes one
//! block of mono input plus its MIDI events and produces one block of
//! stereo output plus the aggregate MIDI record of everything the
//! harmonizer decided to play.

mod allocation;
mod automation;
mod events;

use crate::envelope::EnvelopeConfig;
use crate::error::ConfigError;
use crate::grains::GrainExtractor;
use crate::midi::{PitchBendTracker, PitchConverter, TimedEvent, VelocityMapper};
use crate::panning::PanningManager;
use crate::pitch::{PitchDetector, PitchEstimate};
use crate::sample::{fill_hann_window, Sample};
use crate::voice::{HarmonizerVoice, VoiceRenderContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Most voices a harmonizer will run.
pub const MAX_VOICES: usize = 16;

/// Default seed for the unvoiced-frame randomizer; reseeded on `reset`
/// so identical input always renders identical output.
const DEFAULT_RNG_SEED: u64 = 0x5eed_c0de;

/// Read-only state of a single voice, for hosts and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSnapshot {
    pub playing_note: Option<u8>,
    pub target_hz: f32,
    pub pan: u8,
    pub key_down: bool,
    pub playing_but_released: bool,
    pub is_pedal_voice: bool,
    pub is_descant_voice: bool,
    pub note_on_time: u32,
}

/// Settings for one automated harmony line (pedal pitch or descant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoHarmonySettings {
    pub enabled: bool,
    /// Pedal pitch: activates when the lowest held key is at or below
    /// this. Descant: when the highest held key is at or above it.
    pub threshold: u8,
    /// Interval in semitones below (pedal) or above (descant) the
    /// tracked key.
    pub interval: u8,
}

/// The polyphonic pitch-shifting instrument.
#[derive(Debug, Clone)]
pub struct Harmonizer<S: Sample> {
    pub(crate) voices: Vec<HarmonizerVoice<S>>,

    pub(crate) pitch_detector: PitchDetector<S>,
    pub(crate) grains: GrainExtractor,
    pub(crate) panner: PanningManager,

    pub(crate) pitch_converter: PitchConverter,
    pub(crate) bend_tracker: PitchBendTracker,
    pub(crate) velocity_mapper: VelocityMapper,

    pub(crate) samplerate: f64,
    pub(crate) blocksize: usize,

    /// Latest voiced input, for interval latch and period reuse.
    pub(crate) current_input_hz: f32,

    // MIDI state ---------------------------------------------------------
    pub(crate) latch_on: bool,
    pub(crate) interval_latch_on: bool,
    pub(crate) latched_intervals: Vec<i8>,
    pub(crate) last_interval_pitch: Option<u8>,

    pub(crate) sustain_down: bool,
    pub(crate) sostenuto_down: bool,
    pub(crate) soft_down: bool,

    pub(crate) pedal: AutoHarmonySettings,
    pub(crate) pedal_last_pitch: Option<u8>,
    pub(crate) descant: AutoHarmonySettings,
    pub(crate) descant_last_pitch: Option<u8>,

    pub(crate) note_stealing_enabled: bool,
    pub(crate) lowest_panned_note: u8,

    pub(crate) adsr_enabled: bool,
    pub(crate) adsr_config: EnvelopeConfig,
    pub(crate) quick_attack_ms: f32,
    pub(crate) quick_release_ms: f32,

    pub(crate) soft_pedal_multiplier: f32,
    pub(crate) playing_but_released_multiplier: f32,
    pub(crate) aftertouch_gain_enabled: bool,

    /// Strictly increasing note-on stamp for age-based stealing.
    pub(crate) note_on_counter: u32,

    /// Everything the harmonizer played this block, for the host.
    pub(crate) aggregate_midi: Vec<TimedEvent>,
    pub(crate) last_midi_timestamp: i64,

    // Unvoiced-frame behavior --------------------------------------------
    pub(crate) unvoiced_period_min: usize,
    pub(crate) unvoiced_period_max: usize,
    pub(crate) unvoiced_polarity_flip: bool,
    pub(crate) rng_seed: u64,
    pub(crate) rng: StdRng,

    // Per-block scratch, allocated in `prepare` -------------------------
    /// Hann window sized to two analysis periods, cached until the
    /// period changes.
    pub(crate) window: Vec<S>,
    pub(crate) window_size: usize,
    /// The block actually fed to grain extraction and voices (a copy of
    /// the input, polarity-flipped on some unvoiced frames).
    pub(crate) analysis_input: Vec<S>,
}

impl<S: Sample> Harmonizer<S> {
    pub fn new() -> Self {
        Self {
            voices: Vec::new(),
            pitch_detector: PitchDetector::new(50.0, 2000.0, 44_100.0)
                .expect("default pitch range is valid"),
            grains: GrainExtractor::new(),
            panner: PanningManager::new(),
            pitch_converter: PitchConverter::default(),
            bend_tracker: PitchBendTracker::default(),
            velocity_mapper: VelocityMapper::default(),
            samplerate: 44_100.0,
            blocksize: 0,
            current_input_hz: 0.0,
            latch_on: false,
            interval_latch_on: false,
            latched_intervals: Vec::with_capacity(MAX_VOICES),
            last_interval_pitch: None,
            sustain_down: false,
            sostenuto_down: false,
            soft_down: false,
            pedal: AutoHarmonySettings {
                enabled: false,
                threshold: 0,
                interval: 12,
            },
            pedal_last_pitch: None,
            descant: AutoHarmonySettings {
                enabled: false,
                threshold: 127,
                interval: 12,
            },
            descant_last_pitch: None,
            note_stealing_enabled: true,
            lowest_panned_note: 0,
            adsr_enabled: true,
            adsr_config: EnvelopeConfig::default(),
            quick_attack_ms: 15.0,
            quick_release_ms: 5.0,
            soft_pedal_multiplier: 0.65,
            playing_but_released_multiplier: 0.4,
            aftertouch_gain_enabled: false,
            note_on_counter: 0,
            aggregate_midi: Vec::new(),
            last_midi_timestamp: -1,
            unvoiced_period_min: 24,
            unvoiced_period_max: 60,
            unvoiced_polarity_flip: true,
            rng_seed: DEFAULT_RNG_SEED,
            rng: StdRng::seed_from_u64(DEFAULT_RNG_SEED),
            window: Vec::new(),
            window_size: 0,
            analysis_input: Vec::new(),
        }
    }

    /// Allocates every buffer for the given host format. Must be called
    /// before the first [`render_block`](Self::render_block).
    pub fn prepare(
        &mut self,
        samplerate: f64,
        blocksize: usize,
        num_voices: usize,
    ) -> Result<(), ConfigError> {
        if samplerate <= 0.0 {
            return Err(ConfigError::InvalidSamplerate(samplerate));
        }
        if blocksize < 32 {
            return Err(ConfigError::InvalidBlocksize(blocksize));
        }
        if num_voices == 0 || num_voices > MAX_VOICES {
            return Err(ConfigError::InvalidVoiceCount(num_voices));
        }

        self.samplerate = samplerate;
        self.blocksize = blocksize;
        self.pitch_detector.set_samplerate(samplerate)?;

        self.voices
            .resize_with(num_voices, || HarmonizerVoice::new(samplerate as f32));

        let capacity = self.synthesis_capacity();
        for voice in &mut self.voices {
            voice.set_sample_rate(samplerate as f32);
            voice.set_adsr_config(self.adsr_config);
            voice.set_quick_attack_config(EnvelopeConfig::quick_attack(self.quick_attack_ms));
            voice.set_quick_release_config(EnvelopeConfig::quick_release(self.quick_release_ms));
            voice.prepare(capacity, blocksize);
        }

        self.window.clear();
        self.window.resize(capacity, S::zero());
        self.window_size = 0;

        self.analysis_input.clear();
        self.analysis_input.resize(blocksize, S::zero());

        self.aggregate_midi.reserve(blocksize.min(1024));
        self.grains.prepare(blocksize);
        self.panner.prepare(num_voices);
        self.note_on_counter = 0;

        log::debug!(
            "harmonizer prepared: {} Hz, blocksize {}, {} voices",
            samplerate,
            blocksize,
            num_voices
        );
        Ok(())
    }

    /// Frees every buffer allocated by [`prepare`](Self::prepare).
    pub fn release_resources(&mut self) {
        for voice in &mut self.voices {
            voice.release_resources();
        }
        self.voices = Vec::new();
        self.window = Vec::new();
        self.analysis_input = Vec::new();
        self.aggregate_midi = Vec::new();
        self.grains.release();
        self.blocksize = 0;
        log::debug!("harmonizer released");
    }

    /// Clears every piece of playback state while keeping configuration:
    /// identical input after a reset renders identical output.
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.clear_note();
        }

        self.panner.refill_pool(false);
        self.pitch_detector.reset();
        self.bend_tracker.reset();
        self.rng = StdRng::seed_from_u64(self.rng_seed);

        self.current_input_hz = 0.0;
        self.latched_intervals.clear();
        self.last_interval_pitch = None;
        self.sustain_down = false;
        self.sostenuto_down = false;
        self.soft_down = false;
        self.pedal_last_pitch = None;
        self.descant_last_pitch = None;
        self.note_on_counter = 0;
        self.aggregate_midi.clear();
        self.last_midi_timestamp = -1;
        self.window_size = 0;
    }

    /// Renders one block: analyzes the input, applies the MIDI events in
    /// timestamp order, then overlap-adds every sounding voice into the
    /// stereo pair. The aggregate MIDI produced while doing so is
    /// appended to `midi_out`.
    pub fn render_block(
        &mut self,
        input: &[S],
        midi_in: &[TimedEvent],
        out_left: &mut [S],
        out_right: &mut [S],
        midi_out: &mut Vec<TimedEvent>,
    ) {
        let num_samples = input
            .len()
            .min(out_left.len())
            .min(out_right.len())
            .min(self.analysis_input.len());

        // Events emitted by control calls between blocks (latch release,
        // pedal toggles) are still queued and flush with this block.
        self.last_midi_timestamp = -1;

        // 1. One pitch estimate per block. Unvoiced frames get an
        //    arbitrary period so grain extraction still has a rhythm to
        //    work with, and sometimes flipped polarity.
        let estimate = self.pitch_detector.detect_pitch(&input[..num_samples]);

        let (period, invert) = match estimate {
            PitchEstimate::Voiced { period, hz } => {
                self.current_input_hz = hz;
                (period.round().max(2.0) as usize, false)
            }
            PitchEstimate::Unvoiced => {
                let period = self
                    .rng
                    .gen_range(self.unvoiced_period_min..=self.unvoiced_period_max);
                let invert = self.unvoiced_polarity_flip && self.rng.gen_bool(0.5);
                (period, invert)
            }
        };

        for (slot, &sample) in self.analysis_input[..num_samples].iter_mut().zip(input) {
            *slot = if invert { -sample } else { sample };
        }

        // 2. MIDI, in timestamp order, before any voice renders: every
        //    voice sees a consistent note set for the whole block.
        self.process_midi(midi_in);

        // Interval latch follows the sung pitch between MIDI events.
        if self.interval_latch_on {
            if let PitchEstimate::Voiced { hz, .. } = estimate {
                let sung = self.pitch_converter.ftom(hz).round().clamp(0.0, 127.0) as u8;
                if self.last_interval_pitch != Some(sung) {
                    self.last_interval_pitch = Some(sung);
                    self.replay_latched_intervals();
                }
            }
        }

        // 3. Render the voice bank.
        if self.voices.iter().any(|v| v.is_active()) {
            self.fill_window(2 * period);

            let ctx = VoiceRenderContext {
                samplerate: self.samplerate,
                adsr_enabled: self.adsr_enabled,
                soft_pedal_down: self.soft_down,
                soft_pedal_multiplier: self.soft_pedal_multiplier,
                playing_but_released_multiplier: self.playing_but_released_multiplier,
                aftertouch_gain_enabled: self.aftertouch_gain_enabled,
            };

            let onsets = self
                .grains
                .extract_grain_onsets(&self.analysis_input[..num_samples], period);

            for voice in &mut self.voices {
                if !voice.is_active() {
                    continue;
                }

                let still_sounding = voice.render_block(
                    &self.analysis_input[..num_samples],
                    &self.window,
                    onsets,
                    period,
                    &ctx,
                    &mut out_left[..num_samples],
                    &mut out_right[..num_samples],
                );

                if !still_sounding {
                    if voice.pan_is_from_pool() {
                        self.panner.pan_released(voice.pan());
                    }
                    voice.clear_note();
                }
            }
        }

        midi_out.extend_from_slice(&self.aggregate_midi);
        self.aggregate_midi.clear();
    }

    /// Number of voices currently holding a note.
    pub fn num_active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// The sorted pitches of all sounding voices (including release
    /// tails). Control-thread introspection; allocates.
    pub fn active_note_pitches(&self) -> Vec<u8> {
        let mut notes: Vec<u8> = self
            .voices
            .iter()
            .filter_map(|v| v.playing_note())
            .collect();
        notes.sort_unstable();
        notes
    }

    /// A read-only snapshot of one voice, or None past the voice count.
    pub fn voice_snapshot(&self, index: usize) -> Option<VoiceSnapshot> {
        let voice = self.voices.get(index)?;
        Some(VoiceSnapshot {
            playing_note: voice.playing_note(),
            target_hz: voice.target_hz(),
            pan: voice.pan(),
            key_down: voice.is_key_down(),
            playing_but_released: voice.is_playing_but_released(),
            is_pedal_voice: voice.is_pedal_voice(),
            is_descant_voice: voice.is_descant_voice(),
            note_on_time: voice.note_on_time(),
        })
    }

    /// Configured voice count.
    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    /// The latest voiced input frequency, if any has been seen.
    pub fn current_input_hz(&self) -> Option<f32> {
        (self.current_input_hz > 0.0).then_some(self.current_input_hz)
    }

    /// The frequency a voice must produce for `midi_pitch` under the
    /// current pitch wheel, bend range, and concert pitch.
    pub(crate) fn output_frequency(&self, midi_pitch: u8) -> f32 {
        self.pitch_converter.mtof(self.bend_tracker.apply(midi_pitch))
    }

    /// Synthesis storage must fit two analysis grains of the largest
    /// possible period.
    pub(crate) fn synthesis_capacity(&self) -> usize {
        2 * self.blocksize.max(self.pitch_detector.max_period())
    }

    /// Re-fills the cached Hann window when the grain length changes.
    fn fill_window(&mut self, size: usize) {
        let size = size.min(self.window.len());
        if self.window_size == size {
            return;
        }
        fill_hann_window(&mut self.window, size);
        self.window_size = size;
    }

    // Configuration ------------------------------------------------------

    pub fn set_samplerate(&mut self, samplerate: f64) -> Result<(), ConfigError> {
        if samplerate <= 0.0 {
            return Err(ConfigError::InvalidSamplerate(samplerate));
        }

        self.samplerate = samplerate;
        self.pitch_detector.set_samplerate(samplerate)?;
        for voice in &mut self.voices {
            voice.set_sample_rate(samplerate as f32);
        }
        self.resize_voice_buffers();
        Ok(())
    }

    pub fn set_pitch_detection_range(&mut self, min_hz: f32, max_hz: f32) -> Result<(), ConfigError> {
        self.pitch_detector.set_hz_range(min_hz, max_hz)?;
        self.resize_voice_buffers();
        Ok(())
    }

    pub fn set_pitch_detection_confidence(&mut self, upper: f32, lower: f32) -> Result<(), ConfigError> {
        self.pitch_detector.set_confidence_thresh(upper, lower)
    }

    pub fn set_adsr(&mut self, config: EnvelopeConfig, enabled: bool) -> Result<(), ConfigError> {
        if !config.is_valid() {
            return Err(ConfigError::InvalidAdsr);
        }

        self.adsr_config = config;
        self.adsr_enabled = enabled;
        for voice in &mut self.voices {
            voice.set_adsr_config(config);
        }
        Ok(())
    }

    pub fn set_quick_attack_ms(&mut self, milliseconds: f32) -> Result<(), ConfigError> {
        if milliseconds < 0.0 {
            return Err(ConfigError::InvalidAdsr);
        }
        self.quick_attack_ms = milliseconds;
        for voice in &mut self.voices {
            voice.set_quick_attack_config(EnvelopeConfig::quick_attack(milliseconds));
        }
        Ok(())
    }

    pub fn set_quick_release_ms(&mut self, milliseconds: f32) -> Result<(), ConfigError> {
        if milliseconds < 0.0 {
            return Err(ConfigError::InvalidAdsr);
        }
        self.quick_release_ms = milliseconds;
        for voice in &mut self.voices {
            voice.set_quick_release_config(EnvelopeConfig::quick_release(milliseconds));
        }
        Ok(())
    }

    pub fn set_concert_pitch_hz(&mut self, hz: u16) {
        self.pitch_converter.set_concert_pitch_hz(hz);
        self.retune_active_voices();
    }

    pub fn set_stereo_width(&mut self, width: u8) -> Result<(), ConfigError> {
        if width > 100 {
            return Err(ConfigError::InvalidStereoWidth(width));
        }
        self.panner.set_stereo_width(width);
        Ok(())
    }

    pub fn set_lowest_panned_note(&mut self, note: u8) {
        self.lowest_panned_note = note.min(127);
    }

    pub fn set_velocity_sensitivity(&mut self, sensitivity: u8) {
        self.velocity_mapper.set_sensitivity(sensitivity);
    }

    pub fn set_pitchbend_range(&mut self, up_semitones: u8, down_semitones: u8) {
        self.bend_tracker.set_range(up_semitones, down_semitones);
        self.retune_active_voices();
    }

    pub fn set_note_stealing(&mut self, enabled: bool) {
        self.note_stealing_enabled = enabled;
    }

    pub fn set_soft_pedal_multiplier(&mut self, multiplier: f32) {
        self.soft_pedal_multiplier = multiplier.clamp(0.0, 1.0);
    }

    pub fn set_playing_but_released_multiplier(&mut self, multiplier: f32) {
        self.playing_but_released_multiplier = multiplier.clamp(0.0, 1.0);
    }

    pub fn set_aftertouch_gain_enabled(&mut self, enabled: bool) {
        self.aftertouch_gain_enabled = enabled;
    }

    pub fn set_unvoiced_period_range(&mut self, min: usize, max: usize) -> Result<(), ConfigError> {
        if min < 2 || min > max {
            return Err(ConfigError::InvalidUnvoicedPeriodRange { min, max });
        }
        self.unvoiced_period_min = min;
        self.unvoiced_period_max = max;
        Ok(())
    }

    pub fn set_unvoiced_polarity_flip(&mut self, enabled: bool) {
        self.unvoiced_polarity_flip = enabled;
    }

    /// Reseeds the unvoiced-frame randomizer (takes effect immediately
    /// and on every later `reset`).
    pub fn set_rng_seed(&mut self, seed: u64) {
        self.rng_seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Pushes the current tuning to every sounding voice.
    pub(crate) fn retune_active_voices(&mut self) {
        for index in 0..self.voices.len() {
            if let Some(note) = self.voices[index].playing_note() {
                let hz = self.output_frequency(note);
                self.voices[index].set_target_hz(hz);
            }
        }
    }

    /// Voice synthesis buffers depend on the largest detectable period;
    /// re-prepares them when that changes. Non-audio-thread only.
    fn resize_voice_buffers(&mut self) {
        if self.blocksize == 0 {
            return;
        }

        let capacity = self.synthesis_capacity();
        for voice in &mut self.voices {
            voice.prepare(capacity, self.blocksize);
        }
        if self.window.len() < capacity {
            self.window.resize(capacity, S::zero());
            self.window_size = 0;
        }
    }
}

impl<S: Sample> Default for Harmonizer<S> {
    fn default() -> Self {
        Self::new()
    }
}
