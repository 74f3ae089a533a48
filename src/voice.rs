//! Voice Module
//!
//! One monophonic resynthesis stream. A voice overlap-adds the analysis
//! grains of the current input block at a hop equal to its own target
//! period: a smaller hop packs grains more densely and raises the pitch.
//! Partial overlap-add sums carry across blocks in a ring buffer.
//!
//! The rendered mono signal then passes through the per-block gain
//! pipeline (velocity, soft pedal, playing-but-released, envelopes) and is
//! panned into the shared stereo bus. Every gain ramps across the block so
//! parameter changes never step.

use crate::envelope::{AdsrEnvelope, EnvelopeConfig};
use crate::panning::{StereoPanner, CENTER_PAN};
use crate::ring_buffer::RingBuffer;
use crate::sample::Sample;

/// Read-only per-block state a voice needs from its harmonizer. Passed
/// explicitly to `render_block` so voices never hold a parent pointer.
#[derive(Debug, Clone, Copy)]
pub struct VoiceRenderContext {
    pub samplerate: f64,
    pub adsr_enabled: bool,
    pub soft_pedal_down: bool,
    pub soft_pedal_multiplier: f32,
    pub playing_but_released_multiplier: f32,
    pub aftertouch_gain_enabled: bool,
}

/// A single harmonizer voice.
#[derive(Debug, Clone)]
pub struct HarmonizerVoice<S: Sample> {
    playing_note: Option<u8>,
    target_hz: f32,
    note_on_time: u32,

    key_down: bool,
    quick_fading: bool,
    note_turned_off: bool,
    playing_but_released: bool,
    sustaining_from_sostenuto: bool,
    is_pedal_voice: bool,
    is_descant_voice: bool,

    last_velocity: u8,
    aftertouch: u8,

    velocity_gain: f32,
    prev_velocity_gain: f32,
    prev_soft_pedal_gain: f32,
    prev_released_gain: f32,

    main_adsr: AdsrEnvelope,
    quick_attack: AdsrEnvelope,
    quick_release: AdsrEnvelope,

    panner: StereoPanner,
    pan_from_pool: bool,

    /// Partial overlap-add sums, carried across blocks.
    synthesis: RingBuffer<S>,
    /// Next position in the synthesis buffer to be written; everything
    /// before it is finalized output.
    synthesis_index: usize,

    /// One block of finalized samples, for the gain pipeline.
    scratch: Vec<S>,
}

impl<S: Sample> HarmonizerVoice<S> {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            playing_note: None,
            target_hz: 0.0,
            note_on_time: 0,
            key_down: false,
            quick_fading: false,
            note_turned_off: true,
            playing_but_released: false,
            sustaining_from_sostenuto: false,
            is_pedal_voice: false,
            is_descant_voice: false,
            last_velocity: 0,
            aftertouch: 0,
            velocity_gain: 0.0,
            prev_velocity_gain: 0.0,
            prev_soft_pedal_gain: 1.0,
            prev_released_gain: 1.0,
            main_adsr: AdsrEnvelope::with_config(EnvelopeConfig::default(), sample_rate),
            quick_attack: AdsrEnvelope::with_config(EnvelopeConfig::quick_attack(15.0), sample_rate),
            quick_release: AdsrEnvelope::with_config(EnvelopeConfig::quick_release(5.0), sample_rate),
            panner: StereoPanner::new(),
            pan_from_pool: false,
            synthesis: RingBuffer::new(0),
            synthesis_index: 0,
            scratch: Vec::new(),
        }
    }

    /// Allocates the synthesis storage: `synthesis_capacity` must be at
    /// least twice the largest analysis period, `blocksize` the fixed
    /// render length.
    pub fn prepare(&mut self, synthesis_capacity: usize, blocksize: usize) {
        self.synthesis.resize(synthesis_capacity);
        self.scratch.clear();
        self.scratch.resize(blocksize, S::zero());
        self.synthesis_index = 0;
        self.prev_velocity_gain = self.velocity_gain;
    }

    /// Frees the synthesis storage.
    pub fn release_resources(&mut self) {
        self.synthesis.resize(0);
        self.scratch = Vec::new();
    }

    /// True while this voice holds a note (it may be in its release tail).
    pub fn is_active(&self) -> bool {
        self.playing_note.is_some()
    }

    pub fn playing_note(&self) -> Option<u8> {
        self.playing_note
    }

    pub fn note_on_time(&self) -> u32 {
        self.note_on_time
    }

    pub fn is_key_down(&self) -> bool {
        self.key_down
    }

    pub fn is_playing_but_released(&self) -> bool {
        self.playing_but_released
    }

    pub fn is_pedal_voice(&self) -> bool {
        self.is_pedal_voice
    }

    pub fn is_descant_voice(&self) -> bool {
        self.is_descant_voice
    }

    pub fn is_sustaining_from_sostenuto(&self) -> bool {
        self.sustaining_from_sostenuto
    }

    pub fn set_sustaining_from_sostenuto(&mut self, sustaining: bool) {
        self.sustaining_from_sostenuto = sustaining;
    }

    pub fn clear_pedal_flag(&mut self) {
        self.is_pedal_voice = false;
    }

    pub fn clear_descant_flag(&mut self) {
        self.is_descant_voice = false;
    }

    pub fn last_velocity(&self) -> u8 {
        self.last_velocity
    }

    pub fn aftertouch(&self) -> u8 {
        self.aftertouch
    }

    pub fn aftertouch_changed(&mut self, value: u8) {
        self.aftertouch = value.min(127);
    }

    pub fn target_hz(&self) -> f32 {
        self.target_hz
    }

    /// Retunes the voice (pitch wheel, concert pitch changes).
    pub fn set_target_hz(&mut self, hz: f32) {
        self.target_hz = hz;
    }

    pub fn pan(&self) -> u8 {
        self.panner.pan()
    }

    pub fn pan_is_from_pool(&self) -> bool {
        self.pan_from_pool
    }

    pub fn set_pan(&mut self, pan: u8, from_pool: bool) {
        self.panner.set_pan(pan.min(127));
        self.pan_from_pool = from_pool;
    }

    /// Begins (or retriggers) a note on this voice.
    #[allow(clippy::too_many_arguments)]
    pub fn start_note(
        &mut self,
        note: u8,
        velocity: u8,
        velocity_gain: f32,
        target_hz: f32,
        note_on_time: u32,
        key_down: bool,
        is_pedal: bool,
        is_descant: bool,
    ) {
        self.playing_note = Some(note);
        self.note_on_time = note_on_time;
        self.last_velocity = velocity;
        self.velocity_gain = velocity_gain;
        self.target_hz = target_hz;
        self.quick_fading = false;
        self.note_turned_off = false;
        self.is_pedal_voice = is_pedal;
        self.is_descant_voice = is_descant;

        self.main_adsr.note_on();
        self.quick_attack.note_on();
        if !self.quick_release.is_active() {
            self.quick_release.note_on();
        }

        self.key_down = key_down;
        if key_down {
            self.playing_but_released = false;
        }
    }

    /// Ends the note: with tail-off the main envelope releases, without it
    /// the quick-release fade takes over.
    pub fn stop_note(&mut self, allow_tail_off: bool) {
        if allow_tail_off {
            self.main_adsr.note_off();
            self.quick_fading = false;
        } else {
            if !self.quick_release.is_active() {
                self.quick_release.note_on();
            }
            self.quick_fading = true;
            self.quick_release.note_off();
        }

        self.note_turned_off = true;
        self.key_down = false;
        self.playing_but_released = false;
    }

    /// Updates the physical key state. `held_by_mode` is true when latch
    /// or interval latch would keep the voice sounding at full gain.
    pub fn set_key_down(&mut self, down: bool, held_by_mode: bool) {
        self.key_down = down;

        if down || self.is_pedal_voice || self.is_descant_voice || held_by_mode {
            self.playing_but_released = false;
        } else {
            self.playing_but_released = self.is_active();
        }
    }

    /// Resets all per-note state, leaving the voice idle at center pan.
    pub fn clear_note(&mut self) {
        self.playing_note = None;
        self.target_hz = 0.0;
        self.note_on_time = 0;
        self.key_down = false;
        self.quick_fading = false;
        self.note_turned_off = true;
        self.playing_but_released = false;
        self.sustaining_from_sostenuto = false;
        self.is_pedal_voice = false;
        self.is_descant_voice = false;
        self.last_velocity = 0;
        self.aftertouch = 0;
        self.velocity_gain = 0.0;
        self.prev_velocity_gain = 0.0;
        self.prev_soft_pedal_gain = 1.0;
        self.prev_released_gain = 1.0;

        self.panner.set_pan(CENTER_PAN);
        self.panner.latch();
        self.pan_from_pool = false;

        self.main_adsr.reset();
        self.quick_attack.reset();
        self.quick_release.reset();
        self.quick_release.note_on();

        self.synthesis.clear();
        self.synthesis_index = 0;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.main_adsr.set_sample_rate(sample_rate);
        self.quick_attack.set_sample_rate(sample_rate);
        self.quick_release.set_sample_rate(sample_rate);
    }

    pub fn set_adsr_config(&mut self, config: EnvelopeConfig) {
        self.main_adsr.set_config(config);
    }

    pub fn set_quick_attack_config(&mut self, config: EnvelopeConfig) {
        self.quick_attack.set_config(config);
    }

    pub fn set_quick_release_config(&mut self, config: EnvelopeConfig) {
        self.quick_release.set_config(config);
    }

    /// Renders one block into the stereo bus.
    ///
    /// Returns false once the active envelope has finished; the caller
    /// should then reclaim the voice's pan value and call
    /// [`clear_note`](Self::clear_note).
    #[allow(clippy::too_many_arguments)]
    pub fn render_block(
        &mut self,
        input: &[S],
        window: &[S],
        grain_onsets: &[i32],
        input_period: usize,
        ctx: &VoiceRenderContext,
        out_left: &mut [S],
        out_right: &mut [S],
    ) -> bool {
        let sounding = if self.quick_fading {
            self.quick_release.is_active()
        } else if ctx.adsr_enabled {
            self.main_adsr.is_active()
        } else {
            !self.note_turned_off
        };

        if !sounding || self.target_hz <= 0.0 {
            return false;
        }

        let num_samples = input.len().min(out_left.len()).min(self.scratch.len());

        // The new period is the OLA hop: this is where the pitch change
        // happens.
        let new_period = (ctx.samplerate / self.target_hz as f64).round().max(1.0) as usize;
        self.sola(input, window, grain_onsets, 2 * input_period, new_period);

        self.synthesis.read_into(&mut self.scratch[..num_samples]);
        let scratch = &mut self.scratch[..num_samples];

        // Velocity gain; aftertouch pushes it toward unity when enabled.
        let velocity_now = if ctx.aftertouch_gain_enabled {
            let blend = self.aftertouch as f32 / 127.0;
            self.velocity_gain + blend * (1.0 - self.velocity_gain)
        } else {
            self.velocity_gain
        };
        apply_gain_ramp(scratch, self.prev_velocity_gain, velocity_now);
        self.prev_velocity_gain = velocity_now;

        // Soft pedal gain.
        let soft_now = if ctx.soft_pedal_down {
            ctx.soft_pedal_multiplier
        } else {
            1.0
        };
        apply_gain_ramp(scratch, self.prev_soft_pedal_gain, soft_now);
        self.prev_soft_pedal_gain = soft_now;

        // Playing-but-released gain.
        let released_now = if self.playing_but_released {
            ctx.playing_but_released_multiplier
        } else {
            1.0
        };
        apply_gain_ramp(scratch, self.prev_released_gain, released_now);
        self.prev_released_gain = released_now;

        // The quick attack stands in for the main envelope when the user
        // has disabled it, so note starts still fade in.
        if ctx.adsr_enabled {
            self.main_adsr.apply_to_buffer(scratch);
        } else {
            self.quick_attack.apply_to_buffer(scratch);
        }

        if self.quick_fading {
            self.quick_release.apply_to_buffer(scratch);
        }

        // Pan into the stereo bus.
        add_with_gain_ramp(
            &mut out_left[..num_samples],
            scratch,
            self.panner.prev_left_gain(),
            self.panner.left_gain(),
        );
        add_with_gain_ramp(
            &mut out_right[..num_samples],
            scratch,
            self.panner.prev_right_gain(),
            self.panner.right_gain(),
        );
        self.panner.latch();

        // Consume this block from the synthesis buffer.
        if self.synthesis_index <= num_samples {
            self.synthesis.clear();
            self.synthesis_index = 0;
        } else {
            self.synthesis.advance(num_samples);
            self.synthesis_index -= num_samples;
        }

        true
    }

    /// Synchronous overlap-add: windows each analysis grain and lays
    /// copies into the synthesis buffer every `new_period` samples.
    fn sola(
        &mut self,
        input: &[S],
        window: &[S],
        grain_onsets: &[i32],
        grain_len: usize,
        new_period: usize,
    ) {
        let capacity = self.synthesis.capacity();

        if self.synthesis_index > input.len() {
            return;
        }

        for &onset in grain_onsets {
            let grain_start = onset.max(0) as usize;
            let grain_end = grain_start + grain_len;

            if grain_end > capacity {
                break;
            }
            if self.synthesis_index > grain_end {
                continue;
            }

            // Samples past the end of the block read as zero; the window
            // tail is near zero there anyway.
            let available = input.len().saturating_sub(grain_start).min(grain_len);

            loop {
                if self.synthesis_index + grain_len > capacity {
                    break;
                }

                for i in 0..available {
                    self.synthesis
                        .add(self.synthesis_index + i, window[i] * input[grain_start + i]);
                }

                self.synthesis_index += new_period;
                if self.synthesis_index >= grain_end {
                    break;
                }
            }
        }

        // A hop longer than the final grain can step past the end of the
        // buffer; the write frontier never exceeds the capacity.
        self.synthesis_index = self.synthesis_index.min(capacity);

        // Samples past the write frontier hold partial sums that will be
        // recomputed next block; discard them.
        self.synthesis.zero_range(self.synthesis_index, capacity);
    }

    #[cfg(test)]
    pub(crate) fn synthesis_index(&self) -> usize {
        self.synthesis_index
    }

    #[cfg(test)]
    pub(crate) fn synthesis_capacity(&self) -> usize {
        self.synthesis.capacity()
    }
}

/// Multiplies `buffer` by a gain ramping linearly from `from` to `to`.
fn apply_gain_ramp<S: Sample>(buffer: &mut [S], from: f32, to: f32) {
    if buffer.is_empty() {
        return;
    }

    if (from - to).abs() < 1e-9 {
        let gain = S::coerce32(to);
        for slot in buffer.iter_mut() {
            *slot = *slot * gain;
        }
        return;
    }

    let step = (to - from) / buffer.len() as f32;
    let mut gain = from;
    for slot in buffer.iter_mut() {
        *slot = *slot * S::coerce32(gain);
        gain += step;
    }
}

/// Adds `source` into `target` with a linear gain ramp.
fn add_with_gain_ramp<S: Sample>(target: &mut [S], source: &[S], from: f32, to: f32) {
    debug_assert_eq!(target.len(), source.len());

    if (from - to).abs() < 1e-9 {
        let gain = S::coerce32(to);
        for (t, &s) in target.iter_mut().zip(source) {
            *t += s * gain;
        }
        return;
    }

    let step = (to - from) / target.len() as f32;
    let mut gain = from;
    for (t, &s) in target.iter_mut().zip(source) {
        *t += s * S::coerce32(gain);
        gain += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grains::GrainExtractor;
    use crate::sample::fill_hann_window;
    use std::f64::consts::TAU;

    const SAMPLE_RATE: f64 = 48_000.0;
    const BLOCKSIZE: usize = 512;

    fn context() -> VoiceRenderContext {
        VoiceRenderContext {
            samplerate: SAMPLE_RATE,
            adsr_enabled: true,
            soft_pedal_down: false,
            soft_pedal_multiplier: 0.65,
            playing_but_released_multiplier: 0.4,
            aftertouch_gain_enabled: false,
        }
    }

    fn sine_block(period: usize) -> Vec<f32> {
        (0..BLOCKSIZE)
            .map(|i| (TAU * i as f64 / period as f64).sin() as f32 * 0.5)
            .collect()
    }

    fn prepared_voice() -> HarmonizerVoice<f32> {
        let mut voice = HarmonizerVoice::new(SAMPLE_RATE as f32);
        voice.prepare(BLOCKSIZE * 2, BLOCKSIZE);
        voice
    }

    fn render_blocks(voice: &mut HarmonizerVoice<f32>, period: usize, blocks: usize) -> (Vec<f32>, Vec<f32>) {
        let input = sine_block(period);
        let mut grains = GrainExtractor::new();
        grains.prepare(BLOCKSIZE);

        let mut window = vec![0.0f32; BLOCKSIZE * 2];
        fill_hann_window(&mut window, 2 * period);

        let mut all_left = Vec::new();
        let mut all_right = Vec::new();
        let ctx = context();

        for _ in 0..blocks {
            let onsets: Vec<i32> = grains.extract_grain_onsets(&input, period).to_vec();
            let mut left = vec![0.0f32; BLOCKSIZE];
            let mut right = vec![0.0f32; BLOCKSIZE];
            voice.render_block(&input, &window, &onsets, period, &ctx, &mut left, &mut right);
            all_left.extend_from_slice(&left);
            all_right.extend_from_slice(&right);
        }

        (all_left, all_right)
    }

    fn rms(signal: &[f32]) -> f32 {
        (signal.iter().map(|s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
    }

    #[test]
    fn test_voice_produces_audio_at_unison() {
        let mut voice = prepared_voice();
        voice.start_note(69, 100, 1.0, 440.0, 1, true, false, false);

        let period = (SAMPLE_RATE / 440.0).round() as usize;
        let (left, _) = render_blocks(&mut voice, period, 4);

        // Skip the attack, then expect sustained signal.
        assert!(rms(&left[1024..]) > 0.05, "unison render was near-silent");
    }

    #[test]
    fn test_synthesis_index_invariant() {
        let mut voice = prepared_voice();
        voice.start_note(69, 100, 1.0, 440.0, 1, true, false, false);

        let period = (SAMPLE_RATE / 440.0).round() as usize;
        for _ in 0..6 {
            render_blocks(&mut voice, period, 1);
            assert!(voice.synthesis_index() <= voice.synthesis_capacity());
        }
    }

    #[test]
    fn test_inactive_voice_reports_finished() {
        let mut voice = prepared_voice();
        let input = sine_block(109);
        let window = vec![0.0f32; BLOCKSIZE * 2];
        let mut left = vec![0.0f32; BLOCKSIZE];
        let mut right = vec![0.0f32; BLOCKSIZE];

        let alive = voice.render_block(&input, &window, &[0], 109, &context(), &mut left, &mut right);
        assert!(!alive, "an idle voice must report itself finished");
    }

    #[test]
    fn test_release_tail_then_idle() {
        let mut voice = prepared_voice();
        voice.start_note(69, 100, 1.0, 440.0, 1, true, false, false);

        let period = (SAMPLE_RATE / 440.0).round() as usize;
        render_blocks(&mut voice, period, 2);

        voice.stop_note(true);

        // Default release is 10 ms = 480 samples: the voice should survive
        // the first block after note-off, then report finished.
        let input = sine_block(period);
        let mut grains = GrainExtractor::new();
        grains.prepare(BLOCKSIZE);
        let mut window = vec![0.0f32; BLOCKSIZE * 2];
        fill_hann_window(&mut window, 2 * period);
        let ctx = context();

        let mut survived = 0;
        for _ in 0..10 {
            let onsets: Vec<i32> = grains.extract_grain_onsets(&input, period).to_vec();
            let mut left = vec![0.0f32; BLOCKSIZE];
            let mut right = vec![0.0f32; BLOCKSIZE];
            if voice.render_block(&input, &window, &onsets, period, &ctx, &mut left, &mut right) {
                survived += 1;
            } else {
                break;
            }
        }

        assert!(survived >= 1 && survived < 10, "release lasted {} blocks", survived);
    }

    #[test]
    fn test_quick_fade_is_shorter_than_tail_off() {
        let mut voice = prepared_voice();
        voice.start_note(69, 100, 1.0, 440.0, 1, true, false, false);

        let period = (SAMPLE_RATE / 440.0).round() as usize;
        render_blocks(&mut voice, period, 2);

        voice.stop_note(false);

        // 5 ms quick release = 240 samples: dead within one block.
        let input = sine_block(period);
        let mut grains = GrainExtractor::new();
        grains.prepare(BLOCKSIZE);
        let mut window = vec![0.0f32; BLOCKSIZE * 2];
        fill_hann_window(&mut window, 2 * period);
        let onsets: Vec<i32> = grains.extract_grain_onsets(&input, period).to_vec();

        let mut left = vec![0.0f32; BLOCKSIZE];
        let mut right = vec![0.0f32; BLOCKSIZE];
        voice.render_block(&input, &window, &onsets, period, &context(), &mut left, &mut right);

        let mut left2 = vec![0.0f32; BLOCKSIZE];
        let mut right2 = vec![0.0f32; BLOCKSIZE];
        let alive = voice.render_block(&input, &window, &onsets, period, &context(), &mut left2, &mut right2);
        assert!(!alive, "quick fade should finish within 512 samples");
    }

    #[test]
    fn test_pan_splits_stereo_gains() {
        let mut voice = prepared_voice();
        voice.start_note(69, 100, 1.0, 440.0, 1, true, false, false);
        voice.set_pan(127, true);
        voice.panner.latch();

        let period = (SAMPLE_RATE / 440.0).round() as usize;
        let (left, right) = render_blocks(&mut voice, period, 4);

        let tail = 1024..;
        assert!(rms(&right[tail.clone()]) > 0.05);
        assert!(rms(&left[tail]) < 1e-3, "hard-right pan leaked into the left channel");
    }

    #[test]
    fn test_key_release_marks_playing_but_released() {
        let mut voice = prepared_voice();
        voice.start_note(69, 100, 1.0, 440.0, 1, true, false, false);

        voice.set_key_down(false, false);
        assert!(voice.is_playing_but_released());

        voice.set_key_down(true, false);
        assert!(!voice.is_playing_but_released());

        // Latch holds the voice at full gain.
        voice.set_key_down(false, true);
        assert!(!voice.is_playing_but_released());
    }

    #[test]
    fn test_clear_note_resets_state() {
        let mut voice = prepared_voice();
        voice.start_note(69, 100, 1.0, 440.0, 7, true, true, false);
        voice.aftertouch_changed(90);
        voice.set_pan(100, true);

        voice.clear_note();

        assert!(!voice.is_active());
        assert_eq!(voice.pan(), CENTER_PAN);
        assert_eq!(voice.aftertouch(), 0);
        assert!(!voice.is_pedal_voice());
        assert_eq!(voice.synthesis_index(), 0);
    }
}
