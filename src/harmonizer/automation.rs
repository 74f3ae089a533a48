//! Automated MIDI features: latch, interval latch, chord triggering, and
//! the pedal-pitch / descant auto harmonies.

use super::{AutoHarmonySettings, Harmonizer, MAX_VOICES};
use crate::sample::Sample;

impl<S: Sample> Harmonizer<S> {
    /// While latch is on, keyboard note-offs leave voices sounding; they
    /// only mark the key as up. Turning latch off stops every voice whose
    /// key is no longer held.
    pub fn set_latch(&mut self, enabled: bool) {
        if self.latch_on == enabled {
            return;
        }

        self.latch_on = enabled;

        if enabled {
            return;
        }

        if !self.interval_latch_on || self.latched_intervals.is_empty() {
            self.turn_off_all_keyup_notes(true, false, false);
        } else {
            // Spare the voices the interval latch is still holding.
            let mut held = [0u8; MAX_VOICES];
            let held_count = self.latched_interval_notes(&mut held);

            for index in 0..self.voices.len() {
                let voice = &self.voices[index];
                let note = voice.playing_note();

                let sparable = voice.is_active()
                    && !voice.is_key_down()
                    && !voice.is_pedal_voice()
                    && !voice.is_descant_voice()
                    && note.map_or(true, |n| !held[..held_count].contains(&n));

                if sparable {
                    self.stop_voice(index, 64, true);
                }
            }
        }

        self.pitch_collection_changed();
    }

    pub fn is_latched(&self) -> bool {
        self.latch_on
    }

    /// Interval latch captures the sounding chord as semitone offsets
    /// from the sung pitch; the chord then follows the voice.
    pub fn set_interval_latch(&mut self, enabled: bool) {
        if self.interval_latch_on == enabled {
            return;
        }

        self.interval_latch_on = enabled;

        if enabled {
            self.update_latched_intervals();
            self.last_interval_pitch = self.current_sung_pitch();
            return;
        }

        self.latched_intervals.clear();
        self.last_interval_pitch = None;

        if !self.latch_on {
            self.turn_off_all_keyup_notes(true, false, false);
            self.pitch_collection_changed();
        }
    }

    pub fn is_interval_latch_on(&self) -> bool {
        self.interval_latch_on
    }

    /// The sung input pitch as a rounded MIDI note, if the input is
    /// currently voiced.
    pub(crate) fn current_sung_pitch(&self) -> Option<u8> {
        let hz = self.current_input_hz()?;
        Some(self.pitch_converter.ftom(hz).round().clamp(0.0, 127.0) as u8)
    }

    /// Stores the distance in semitones of each sounding note from the
    /// sung pitch.
    pub(crate) fn update_latched_intervals(&mut self) {
        self.latched_intervals.clear();

        let Some(sung) = self.current_sung_pitch() else {
            return;
        };

        let mut notes = [0u8; MAX_VOICES];
        let count = self.collect_active_notes(false, true, &mut notes);

        for &note in &notes[..count] {
            let interval = (note as i16 - sung as i16).clamp(i8::MIN as i16, i8::MAX as i16);
            self.latched_intervals.push(interval as i8);
        }
    }

    /// Writes the latched chord transposed to the current sung pitch.
    fn latched_interval_notes(&self, out: &mut [u8; MAX_VOICES]) -> usize {
        let Some(sung) = self.last_interval_pitch.or_else(|| self.current_sung_pitch()) else {
            return 0;
        };

        let mut count = 0;
        for &interval in &self.latched_intervals {
            let pitch = sung as i16 + interval as i16;
            if (0..=127).contains(&pitch) && count < MAX_VOICES {
                out[count] = pitch as u8;
                count += 1;
            }
        }
        count
    }

    /// Re-triggers the latched chord at the current sung pitch.
    pub(crate) fn replay_latched_intervals(&mut self) {
        if self.latched_intervals.is_empty() {
            return;
        }

        let mut desired = [0u8; MAX_VOICES];
        let count = self.latched_interval_notes(&mut desired);
        self.play_chord_internal(&desired[..count], 127, true, true);
    }

    /// Leaves exactly the desired pitches playing: currently sounding
    /// notes not in `desired` are released, missing ones are started.
    pub fn play_chord(&mut self, desired: &[u8], velocity: u8, allow_tail_off: bool) {
        self.play_chord_internal(desired, velocity, allow_tail_off, false);
    }

    fn play_chord_internal(
        &mut self,
        desired: &[u8],
        velocity: u8,
        allow_tail_off: bool,
        from_interval_latch: bool,
    ) {
        if desired.is_empty() {
            self.all_notes_off(allow_tail_off);
            return;
        }

        let mut current = [0u8; MAX_VOICES];
        let current_count = self.collect_active_notes(false, true, &mut current);

        for i in 0..current_count {
            let note = current[i];
            if !desired.contains(&note) {
                self.note_off(note, 64, allow_tail_off, false);
            }
        }

        for &note in desired {
            if !current[..current_count].contains(&note) {
                self.note_on(note, velocity, false);
            }
        }

        if !from_interval_latch {
            self.pitch_collection_changed();
        }
    }

    /// Called once after every batch of events that may have changed the
    /// note set; reapplies the automated harmonies.
    pub(crate) fn pitch_collection_changed(&mut self) {
        if self.pedal.enabled {
            self.apply_pedal_pitch();
        }
        if self.descant.enabled {
            self.apply_descant();
        }
        if self.interval_latch_on {
            self.replay_latched_intervals();
        }
    }

    pub fn set_pedal_pitch(&mut self, enabled: bool, upper_threshold: u8, interval: u8) {
        let was_enabled = self.pedal.enabled;
        self.pedal = AutoHarmonySettings {
            enabled,
            threshold: upper_threshold.min(127),
            interval: interval.min(127),
        };

        if !enabled && was_enabled {
            if let Some(last) = self.pedal_last_pitch {
                self.note_off(last, 127, false, false);
                self.pedal_last_pitch = None;
            }
        } else if enabled {
            self.apply_pedal_pitch();
        }
    }

    pub fn pedal_pitch_settings(&self) -> AutoHarmonySettings {
        self.pedal
    }

    pub fn set_descant(&mut self, enabled: bool, lower_threshold: u8, interval: u8) {
        let was_enabled = self.descant.enabled;
        self.descant = AutoHarmonySettings {
            enabled,
            threshold: lower_threshold.min(127),
            interval: interval.min(127),
        };

        if !enabled && was_enabled {
            if let Some(last) = self.descant_last_pitch {
                self.note_off(last, 127, false, false);
                self.descant_last_pitch = None;
            }
        } else if enabled {
            self.apply_descant();
        }
    }

    pub fn descant_settings(&self) -> AutoHarmonySettings {
        self.descant
    }

    /// Doubles the lowest held key at a fixed interval below, when that
    /// key sits at or below the configured threshold.
    pub(crate) fn apply_pedal_pitch(&mut self) {
        let mut lowest: Option<(u8, usize)> = None;

        for (index, voice) in self.voices.iter().enumerate() {
            if voice.is_active() && voice.is_key_down() {
                if let Some(note) = voice.playing_note() {
                    if lowest.map_or(true, |(n, _)| note < n) {
                        lowest = Some((note, index));
                    }
                }
            }
        }

        let qualifying = lowest.filter(|&(note, _)| note <= self.pedal.threshold);
        let Some((lowest_note, lowest_index)) = qualifying else {
            if let Some(last) = self.pedal_last_pitch {
                self.note_off(last, 127, false, false);
            }
            return;
        };

        let new_pitch = lowest_note as i16 - self.pedal.interval as i16;

        if self.pedal_last_pitch == Some(new_pitch.max(0) as u8) && new_pitch >= 0 {
            return;
        }

        if new_pitch < 0 || self.is_pitch_active(new_pitch as u8, false, true) {
            if let Some(last) = self.pedal_last_pitch {
                self.note_off(last, 127, false, false);
            }
            return;
        }

        let new_pitch = new_pitch as u8;
        let velocity = self.voices[lowest_index].last_velocity().max(1);

        // Keep the pedal line on one voice when possible.
        let previous_voice = self
            .current_pedal_voice()
            .filter(|&index| !self.voices[index].is_key_down());

        if let Some(index) = previous_voice {
            self.pedal_last_pitch = Some(new_pitch);
            self.start_voice(index, new_pitch, velocity, false);
        } else {
            if let Some(last) = self.pedal_last_pitch {
                self.note_off(last, 127, false, false);
            }
            self.pedal_last_pitch = Some(new_pitch);
            self.note_on(new_pitch, velocity, false);
        }
    }

    /// Doubles the highest held key at a fixed interval above, when that
    /// key sits at or above the configured threshold.
    pub(crate) fn apply_descant(&mut self) {
        let mut highest: Option<(u8, usize)> = None;

        for (index, voice) in self.voices.iter().enumerate() {
            if voice.is_active() && voice.is_key_down() {
                if let Some(note) = voice.playing_note() {
                    if highest.map_or(true, |(n, _)| note > n) {
                        highest = Some((note, index));
                    }
                }
            }
        }

        let qualifying = highest.filter(|&(note, _)| note >= self.descant.threshold);
        let Some((highest_note, highest_index)) = qualifying else {
            if let Some(last) = self.descant_last_pitch {
                self.note_off(last, 127, false, false);
            }
            return;
        };

        let new_pitch = highest_note as i16 + self.descant.interval as i16;

        if self.descant_last_pitch == Some(new_pitch.min(127) as u8) && new_pitch <= 127 {
            return;
        }

        if new_pitch > 127 || self.is_pitch_active(new_pitch as u8, false, true) {
            if let Some(last) = self.descant_last_pitch {
                self.note_off(last, 127, false, false);
            }
            return;
        }

        let new_pitch = new_pitch as u8;
        let velocity = self.voices[highest_index].last_velocity().max(1);

        let previous_voice = self
            .current_descant_voice()
            .filter(|&index| !self.voices[index].is_key_down());

        if let Some(index) = previous_voice {
            self.descant_last_pitch = Some(new_pitch);
            self.start_voice(index, new_pitch, velocity, false);
        } else {
            if let Some(last) = self.descant_last_pitch {
                self.note_off(last, 127, false, false);
            }
            self.descant_last_pitch = Some(new_pitch);
            self.note_on(new_pitch, velocity, false);
        }
    }
}
