//! MIDI event handling for the harmonizer: note routing, pedals, pitch
//! wheel, aftertouch, and the aggregate MIDI record.

use super::Harmonizer;
use crate::midi::{
    MidiEvent, TimedEvent, CC_BALANCE, CC_BREATH, CC_FOOT, CC_LEGATO, CC_MOD_WHEEL,
    CC_PORTAMENTO_TIME, CC_SOFT_PEDAL, CC_SOSTENUTO_PEDAL, CC_SUSTAIN_PEDAL,
};
use crate::sample::Sample;

impl<S: Sample> Harmonizer<S> {
    /// Applies a block's MIDI events in order, then reapplies the
    /// automated harmonies once for the changed note set.
    pub(crate) fn process_midi(&mut self, midi_in: &[TimedEvent]) {
        if midi_in.is_empty() {
            return;
        }

        for event in midi_in {
            self.handle_midi_event(*event);
        }

        self.pitch_collection_changed();
    }

    /// Routes one timestamped event.
    pub(crate) fn handle_midi_event(&mut self, timed: TimedEvent) {
        // Auto-generated responses are stamped just after the event that
        // caused them.
        self.last_midi_timestamp = timed.sample_offset as i64 - 1;

        match timed.event {
            MidiEvent::NoteOn { note, velocity } if velocity > 0 => {
                self.note_on(note, velocity, true);
            }
            MidiEvent::NoteOn { note, .. } => {
                // Velocity zero is a note-off by MIDI convention.
                self.note_off(note, 64, true, true);
            }
            MidiEvent::NoteOff { note, velocity } => {
                self.note_off(note, velocity, true, true);
            }
            MidiEvent::AllNotesOff | MidiEvent::AllSoundOff => {
                self.all_notes_off(false);
            }
            MidiEvent::PitchWheel { value } => {
                self.handle_pitch_wheel(value);
            }
            MidiEvent::Aftertouch { note, value } => {
                self.handle_aftertouch(note, value);
            }
            MidiEvent::ChannelPressure { value } => {
                self.handle_channel_pressure(value);
            }
            MidiEvent::Controller { controller, value } => {
                self.handle_controller(controller, value);
            }
        }
    }

    /// Appends an event to the aggregate output at the next intra-block
    /// timestamp.
    pub(crate) fn emit(&mut self, event: MidiEvent) {
        self.last_midi_timestamp += 1;
        let stamp = self.last_midi_timestamp.max(0) as u32;
        self.aggregate_midi.push(TimedEvent::new(stamp, event));
    }

    /// Routes a note-on to a voice: retrigger first, then a free voice,
    /// then (for keyboard events only) a stolen one.
    pub(crate) fn note_on(&mut self, pitch: u8, velocity: u8, is_keyboard: bool) {
        let pitch = pitch.min(127);

        let voice_index = if let Some(index) = self.voice_playing_note(pitch) {
            Some(index)
        } else {
            // Automated pedal/descant events never steal.
            let stealing = is_keyboard && self.note_stealing_enabled;
            self.find_free_voice(stealing)
        };

        match voice_index {
            Some(index) => self.start_voice(index, pitch, velocity, is_keyboard),
            None => {
                // Nothing to play it on; forget a pending auto pitch so
                // the harmony retries later.
                if self.pedal_last_pitch == Some(pitch) {
                    self.pedal_last_pitch = None;
                }
                if self.descant_last_pitch == Some(pitch) {
                    self.descant_last_pitch = None;
                }
            }
        }
    }

    pub(crate) fn start_voice(&mut self, index: usize, pitch: u8, velocity: u8, is_keyboard: bool) {
        let prev_note = self.voices[index].playing_note();
        let was_stolen = self.voices[index].is_active();
        let same_note_retriggered = was_stolen && prev_note == Some(pitch);

        if !same_note_retriggered {
            if let (true, Some(prev)) = (was_stolen, prev_note) {
                self.emit(MidiEvent::NoteOff {
                    note: prev,
                    velocity: 127,
                });
            }
            self.emit(MidiEvent::NoteOn {
                note: pitch,
                velocity,
            });
        } else if self.aftertouch_gain_enabled {
            // Retriggering the same note becomes an aftertouch update
            // instead of a new note event.
            let pressure = (velocity as i16 - self.voices[index].last_velocity() as i16)
                .clamp(0, 127) as u8;
            if pressure != self.voices[index].aftertouch() {
                self.emit(MidiEvent::Aftertouch {
                    note: pitch,
                    value: pressure,
                });
                self.voices[index].aftertouch_changed(pressure);
            }
        }

        // Notes below the panning threshold always sit dead center.
        if pitch < self.lowest_panned_note {
            if was_stolen && self.voices[index].pan_is_from_pool() {
                self.panner.pan_released(self.voices[index].pan());
            }
            self.voices[index].set_pan(64, false);
        } else if !was_stolen {
            let pan = self.panner.next_pan();
            self.voices[index].set_pan(pan, true);
        }

        if !was_stolen {
            self.voices[index].aftertouch_changed(0);
        }

        let is_pedal = self.pedal.enabled && self.pedal_last_pitch == Some(pitch);
        let is_descant = self.descant.enabled && self.descant_last_pitch == Some(pitch);

        let note_on_time = if same_note_retriggered {
            self.voices[index].note_on_time()
        } else {
            self.note_on_counter += 1;
            self.note_on_counter
        };

        let key_down = if is_keyboard {
            true
        } else {
            self.voices[index].is_key_down()
        };

        let velocity_gain = self.velocity_mapper.gain(velocity);
        let target_hz = self.output_frequency(pitch);

        self.voices[index].start_note(
            pitch,
            velocity,
            velocity_gain,
            target_hz,
            note_on_time,
            key_down,
            is_pedal,
            is_descant,
        );
    }

    /// Routes a note-off. Keyboard offs respect latch and the sustain /
    /// sostenuto pedals; automated offs only stop voices whose key is up.
    pub(crate) fn note_off(&mut self, pitch: u8, velocity: u8, allow_tail_off: bool, is_keyboard: bool) {
        let Some(index) = self.voice_playing_note(pitch) else {
            if self.pedal_last_pitch == Some(pitch) {
                self.pedal_last_pitch = None;
            }
            if self.descant_last_pitch == Some(pitch) {
                self.descant_last_pitch = None;
            }
            return;
        };

        if is_keyboard {
            if self.latch_on {
                let held = self.latch_on || self.interval_latch_on;
                self.voices[index].set_key_down(false, held);
            } else if self.sustain_down || self.voices[index].is_sustaining_from_sostenuto() {
                self.voices[index].set_key_down(false, self.interval_latch_on);
            } else {
                self.stop_voice(index, velocity, allow_tail_off);
            }
            return;
        }

        // Automated note-off: only stop the voice if its key is up.
        if !self.voices[index].is_key_down() {
            self.stop_voice(index, velocity, allow_tail_off);
            return;
        }

        // The keyboard key that spawned this voice is still held: the
        // automated line lets go of the voice but the note keeps ringing.
        if self.pedal.enabled && self.pedal_last_pitch == Some(pitch) {
            self.pedal_last_pitch = None;
            self.voices[index].clear_pedal_flag();
            self.voices[index].set_key_down(true, false);
        }

        if self.descant.enabled && self.descant_last_pitch == Some(pitch) {
            self.descant_last_pitch = None;
            self.voices[index].clear_descant_flag();
            self.voices[index].set_key_down(true, false);
        }
    }

    /// Stops a sounding voice, emitting its note-off.
    pub(crate) fn stop_voice(&mut self, index: usize, velocity: u8, allow_tail_off: bool) {
        if self.sostenuto_down && self.voices[index].is_sustaining_from_sostenuto() {
            return;
        }

        let Some(note) = self.voices[index].playing_note() else {
            return;
        };

        self.emit(MidiEvent::NoteOff { note, velocity });

        if self.voices[index].is_pedal_voice() {
            self.pedal_last_pitch = None;
        }
        if self.voices[index].is_descant_voice() {
            self.descant_last_pitch = None;
        }

        self.voices[index].stop_note(allow_tail_off);
    }

    /// Stops every sounding voice and refills the pan pool.
    pub(crate) fn all_notes_off(&mut self, allow_tail_off: bool) {
        for index in 0..self.voices.len() {
            if self.voices[index].is_active() {
                self.stop_voice(index, 64, allow_tail_off);
            }
        }
        self.panner.refill_pool(false);
    }

    fn handle_pitch_wheel(&mut self, raw_value: u16) {
        let before = self.bend_tracker.wheel();
        self.bend_tracker.wheel_changed(raw_value);

        if self.bend_tracker.wheel() == before {
            return;
        }

        self.emit(MidiEvent::PitchWheel { value: raw_value });
        self.retune_active_voices();
    }

    fn handle_aftertouch(&mut self, note: u8, value: u8) {
        let value = value.min(127);

        self.emit(MidiEvent::Aftertouch { note, value });

        if let Some(index) = self.voice_playing_note(note) {
            self.voices[index].aftertouch_changed(value);
        }
    }

    /// Channel pressure maps to aftertouch on every sounding voice.
    fn handle_channel_pressure(&mut self, value: u8) {
        let value = value.min(127);

        self.emit(MidiEvent::ChannelPressure { value });

        for voice in &mut self.voices {
            if voice.is_active() {
                voice.aftertouch_changed(value);
            }
        }
    }

    fn handle_controller(&mut self, controller: u8, value: u8) {
        match controller {
            CC_SUSTAIN_PEDAL => self.handle_sustain_pedal(value),
            CC_SOSTENUTO_PEDAL => self.handle_sostenuto_pedal(value),
            CC_SOFT_PEDAL => self.handle_soft_pedal(value),
            // Recognized but currently unmapped controls.
            CC_MOD_WHEEL | CC_BREATH | CC_FOOT | CC_PORTAMENTO_TIME | CC_BALANCE | CC_LEGATO => {}
            _ => {}
        }
    }

    fn handle_sustain_pedal(&mut self, value: u8) {
        let is_down = value >= 64;
        if self.sustain_down == is_down {
            return;
        }

        self.emit(MidiEvent::Controller {
            controller: CC_SUSTAIN_PEDAL,
            value,
        });
        self.sustain_down = is_down;

        if !is_down && !(self.latch_on || self.interval_latch_on) {
            self.turn_off_all_keyup_notes(false, false, false);
        }
    }

    fn handle_sostenuto_pedal(&mut self, value: u8) {
        let is_down = value >= 64;
        if self.sostenuto_down == is_down {
            return;
        }

        self.emit(MidiEvent::Controller {
            controller: CC_SOSTENUTO_PEDAL,
            value,
        });
        self.sostenuto_down = is_down;

        if is_down && !(self.latch_on || self.interval_latch_on) {
            // Capture: whatever sounds when the pedal goes down keeps
            // ringing after its key is released.
            for voice in &mut self.voices {
                if voice.is_active() && !voice.is_pedal_voice() && !voice.is_descant_voice() {
                    voice.set_sustaining_from_sostenuto(true);
                }
            }
        } else if !is_down {
            for voice in &mut self.voices {
                voice.set_sustaining_from_sostenuto(false);
            }
            self.turn_off_all_keyup_notes(false, false, true);
        }
    }

    fn handle_soft_pedal(&mut self, value: u8) {
        let is_down = value >= 64;
        if self.soft_down == is_down {
            return;
        }

        self.soft_down = is_down;
        self.emit(MidiEvent::Controller {
            controller: CC_SOFT_PEDAL,
            value,
        });
    }

    /// Stops every active voice whose key is up, optionally including the
    /// automated pedal/descant voices, optionally overriding sostenuto.
    pub(crate) fn turn_off_all_keyup_notes(
        &mut self,
        allow_tail_off: bool,
        include_auto_voices: bool,
        override_sostenuto: bool,
    ) {
        for index in 0..self.voices.len() {
            let voice = &self.voices[index];

            if !voice.is_active() || voice.is_key_down() {
                continue;
            }
            if !include_auto_voices && (voice.is_pedal_voice() || voice.is_descant_voice()) {
                continue;
            }
            if !override_sostenuto && voice.is_sustaining_from_sostenuto() {
                continue;
            }

            if override_sostenuto {
                self.voices[index].set_sustaining_from_sostenuto(false);
            }
            self.stop_voice(index, 64, allow_tail_off);
        }
    }
}
