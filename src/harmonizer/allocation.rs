//! Voice allocation: free-voice lookup, stealing heuristics, and live
//! voice-count changes.

use super::{Harmonizer, MAX_VOICES};
use crate::error::ConfigError;
use crate::midi::MidiEvent;
use crate::sample::Sample;
use crate::voice::HarmonizerVoice;

impl<S: Sample> Harmonizer<S> {
    /// Index of the voice currently playing `pitch`, if any. At most one
    /// voice holds a given note at a time.
    pub(crate) fn voice_playing_note(&self, pitch: u8) -> Option<usize> {
        self.voices
            .iter()
            .position(|v| v.is_active() && v.playing_note() == Some(pitch))
    }

    /// Index of the active pedal-pitch voice, if the feature is on.
    pub(crate) fn current_pedal_voice(&self) -> Option<usize> {
        if !self.pedal.enabled {
            return None;
        }
        self.voices
            .iter()
            .position(|v| v.is_active() && v.is_pedal_voice())
    }

    /// Index of the active descant voice, if the feature is on.
    pub(crate) fn current_descant_voice(&self) -> Option<usize> {
        if !self.descant.enabled {
            return None;
        }
        self.voices
            .iter()
            .position(|v| v.is_active() && v.is_descant_voice())
    }

    /// Finds an idle voice, or (when allowed) picks one to steal.
    pub(crate) fn find_free_voice(&mut self, steal_if_none_available: bool) -> Option<usize> {
        if let Some(index) = self.voices.iter().position(|v| !v.is_active()) {
            return Some(index);
        }

        if !steal_if_none_available {
            return None;
        }

        self.find_voice_to_steal()
    }

    /// Stealing heuristics, in order:
    /// - re-use the oldest notes first;
    /// - protect the lowest and highest sounding notes unless released;
    /// - protect the pedal and descant voices, surrendering them only to
    ///   avoid stealing the outer manual notes.
    pub(crate) fn find_voice_to_steal(&self) -> Option<usize> {
        if self.voices.is_empty() {
            return None;
        }

        let pedal_voice = self.current_pedal_voice();
        let descant_voice = self.current_descant_voice();

        // Candidate indices ordered oldest-first.
        let mut usable = [0usize; MAX_VOICES];
        let mut usable_len = 0;

        let mut low: Option<usize> = None;
        let mut top: Option<usize> = None;

        for (index, voice) in self.voices.iter().enumerate() {
            if Some(index) == pedal_voice || Some(index) == descant_voice {
                continue;
            }

            usable[usable_len] = index;
            usable_len += 1;

            if voice.is_active() && !voice.is_playing_but_released() {
                let note = voice.playing_note();
                if low.map_or(true, |l| note < self.voices[l].playing_note()) {
                    low = Some(index);
                }
                if top.map_or(true, |t| note > self.voices[t].playing_note()) {
                    top = Some(index);
                }
            }
        }

        let usable = &mut usable[..usable_len];
        usable.sort_by_key(|&index| self.voices[index].note_on_time());

        // With a single sounding note, precedence goes to the low voice.
        if top == low {
            top = None;
        }

        // Oldest voice whose key is already up.
        for &index in usable.iter() {
            if Some(index) != low && Some(index) != top && !self.voices[index].is_key_down() {
                return Some(index);
            }
        }

        // Oldest voice of any kind, still sparing the outer notes.
        for &index in usable.iter() {
            if Some(index) != low && Some(index) != top {
                return Some(index);
            }
        }

        // Only protected voices remain.
        descant_voice.or(pedal_voice).or(top).or(low)
    }

    /// Changes the configured voice count, removing idle voices first and
    /// emitting note-offs for any active voice that must go. Not safe
    /// during a render; intended for the control thread between blocks.
    pub(crate) fn change_num_voices(&mut self, num_voices: usize) -> Result<(), ConfigError> {
        if num_voices == 0 || num_voices > MAX_VOICES {
            return Err(ConfigError::InvalidVoiceCount(num_voices));
        }

        while self.voices.len() > num_voices {
            let index = self
                .voices
                .iter()
                .position(|v| !v.is_active())
                .or_else(|| self.find_voice_to_steal())
                .unwrap_or(0);

            if let Some(note) = self.voices[index].playing_note() {
                self.emit(MidiEvent::NoteOff {
                    note,
                    velocity: 127,
                });
            }
            self.voices.remove(index);
        }

        if self.voices.len() < num_voices {
            let samplerate = self.samplerate as f32;
            let capacity = self.synthesis_capacity();
            let blocksize = self.blocksize;

            while self.voices.len() < num_voices {
                let mut voice = HarmonizerVoice::new(samplerate);
                voice.set_adsr_config(self.adsr_config);
                voice.set_quick_attack_config(crate::envelope::EnvelopeConfig::quick_attack(
                    self.quick_attack_ms,
                ));
                voice.set_quick_release_config(crate::envelope::EnvelopeConfig::quick_release(
                    self.quick_release_ms,
                ));
                if blocksize > 0 {
                    voice.prepare(capacity, blocksize);
                }
                self.voices.push(voice);
            }
        }

        self.panner.prepare(num_voices);
        log::debug!("voice count changed to {}", num_voices);
        Ok(())
    }

    /// True if `pitch` is sounding, with filters for released voices and
    /// key-up voices.
    pub(crate) fn is_pitch_active(
        &self,
        pitch: u8,
        count_ringing_but_released: bool,
        count_key_up_notes: bool,
    ) -> bool {
        self.voices.iter().any(|v| {
            v.is_active()
                && v.playing_note() == Some(pitch)
                && (count_ringing_but_released || !v.is_playing_but_released())
                && (count_key_up_notes || v.is_key_down())
        })
    }

    /// Writes the sorted pitches of active voices into `out`, returning
    /// how many were written.
    pub(crate) fn collect_active_notes(
        &self,
        include_playing_but_released: bool,
        include_key_up_notes: bool,
        out: &mut [u8; MAX_VOICES],
    ) -> usize {
        let mut count = 0;

        for voice in &self.voices {
            if !voice.is_active() {
                continue;
            }
            if !include_playing_but_released && voice.is_playing_but_released() {
                continue;
            }
            if !include_key_up_notes && !voice.is_key_down() {
                continue;
            }
            if let Some(note) = voice.playing_note() {
                if count < MAX_VOICES {
                    out[count] = note;
                    count += 1;
                }
            }
        }

        out[..count].sort_unstable();
        count
    }
}
