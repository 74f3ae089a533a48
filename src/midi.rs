//! MIDI Module
//!
//! The MIDI event taxonomy the engine consumes and produces, plus the
//! small converters shared by the harmonizer: MIDI pitch to frequency,
//! pitch-wheel bend tracking, and velocity-to-gain mapping.

use serde::{Deserialize, Serialize};

pub const CC_MOD_WHEEL: u8 = 0x01;
pub const CC_BREATH: u8 = 0x02;
pub const CC_FOOT: u8 = 0x04;
pub const CC_PORTAMENTO_TIME: u8 = 0x05;
pub const CC_BALANCE: u8 = 0x08;
pub const CC_SUSTAIN_PEDAL: u8 = 0x40;
pub const CC_SOSTENUTO_PEDAL: u8 = 0x42;
pub const CC_SOFT_PEDAL: u8 = 0x43;
pub const CC_LEGATO: u8 = 0x44;

/// A MIDI event, host convention: notes and controllers carry 7-bit
/// values, the pitch wheel carries the full 14-bit value (center 8192).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    PitchWheel { value: u16 },
    Aftertouch { note: u8, value: u8 },
    ChannelPressure { value: u8 },
    Controller { controller: u8, value: u8 },
    AllNotesOff,
    AllSoundOff,
}

/// A MIDI event stamped with its sample position within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub sample_offset: u32,
    pub event: MidiEvent,
}

impl TimedEvent {
    pub fn new(sample_offset: u32, event: MidiEvent) -> Self {
        Self {
            sample_offset,
            event,
        }
    }
}

/// Converts between MIDI pitch and frequency under the current tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PitchConverter {
    /// Frequency of the root note, usually 440 Hz.
    concert_pitch_hz: f32,
    /// MIDI pitch of the concert pitch, usually 69 (A4).
    root_note: f32,
    /// Notes per octave, usually 12.
    notes_per_octave: f32,
}

impl PitchConverter {
    pub fn new(concert_pitch_hz: u16, root_note: u8, notes_per_octave: u8) -> Self {
        Self {
            concert_pitch_hz: concert_pitch_hz as f32,
            root_note: root_note as f32,
            notes_per_octave: notes_per_octave as f32,
        }
    }

    /// MIDI pitch (fractional allowed) to frequency in Hz.
    pub fn mtof(&self, midi_pitch: f32) -> f32 {
        self.concert_pitch_hz * 2.0f32.powf((midi_pitch - self.root_note) / self.notes_per_octave)
    }

    /// Frequency in Hz to MIDI pitch (fractional).
    pub fn ftom(&self, hz: f32) -> f32 {
        debug_assert!(hz > 0.0);
        self.notes_per_octave * (hz / self.concert_pitch_hz).log2() + self.root_note
    }

    pub fn set_concert_pitch_hz(&mut self, hz: u16) {
        self.concert_pitch_hz = hz as f32;
    }

    pub fn concert_pitch_hz(&self) -> u16 {
        self.concert_pitch_hz as u16
    }
}

impl Default for PitchConverter {
    fn default() -> Self {
        Self::new(440, 69, 12)
    }
}

/// Tracks the pitch wheel and applies the configured bend range to
/// incoming notes. The engine re-scales the 14-bit wheel to 0..127 with
/// center 64.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PitchBendTracker {
    range_up_semitones: u8,
    range_down_semitones: u8,
    last_wheel: u8,
}

impl PitchBendTracker {
    pub fn new(range_up_semitones: u8, range_down_semitones: u8) -> Self {
        Self {
            range_up_semitones,
            range_down_semitones,
            last_wheel: 64,
        }
    }

    pub fn set_range(&mut self, up_semitones: u8, down_semitones: u8) {
        self.range_up_semitones = up_semitones;
        self.range_down_semitones = down_semitones;
    }

    pub fn range(&self) -> (u8, u8) {
        (self.range_up_semitones, self.range_down_semitones)
    }

    /// Records a new wheel position, re-scaled from 14-bit to 0..127.
    pub fn wheel_changed(&mut self, raw_value: u16) {
        self.last_wheel = (raw_value.min(16383) >> 7) as u8;
    }

    pub fn wheel(&self) -> u8 {
        self.last_wheel
    }

    pub fn reset(&mut self) {
        self.last_wheel = 64;
    }

    /// A note number bent by the current wheel position, as fractional
    /// MIDI pitch.
    pub fn apply(&self, midi_pitch: u8) -> f32 {
        let pitch = midi_pitch as f32;
        let wheel = self.last_wheel;

        if wheel == 64 {
            return pitch;
        }

        if wheel > 64 {
            let up = self.range_up_semitones as f32;
            return pitch + up * (wheel as f32 - 65.0) / 62.0;
        }

        let down = self.range_down_semitones as f32;
        pitch + (1.0 - down) * wheel as f32 / 63.0 - down
    }
}

impl Default for PitchBendTracker {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

/// Maps MIDI velocity to a gain multiplier under the configured
/// sensitivity: at zero sensitivity every note plays at full gain, at
/// full sensitivity the gain tracks the velocity linearly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VelocityMapper {
    sensitivity: f32,
}

impl VelocityMapper {
    /// `sensitivity` in [0, 100].
    pub fn new(sensitivity: u8) -> Self {
        Self {
            sensitivity: sensitivity.min(100) as f32 / 100.0,
        }
    }

    pub fn set_sensitivity(&mut self, sensitivity: u8) {
        self.sensitivity = sensitivity.min(100) as f32 / 100.0;
    }

    pub fn sensitivity(&self) -> u8 {
        (self.sensitivity * 100.0).round() as u8
    }

    /// Gain multiplier for a 7-bit velocity.
    pub fn gain(&self, velocity: u8) -> f32 {
        let v = velocity.min(127) as f32 / 127.0;
        (1.0 - v) * (1.0 - self.sensitivity) + v
    }
}

impl Default for VelocityMapper {
    fn default() -> Self {
        Self::new(100)
    }
}
