//! Panning Module
//!
//! Stereo placement for the voice bank. The panning manager derives a set
//! of evenly spaced MIDI pan values from the stereo width and voice count
//! and hands them out "middle-out": the first voice to sound sits in the
//! center, later voices alternate outward to the sides. Released values
//! return to the pool and keep their middle-out priority.

use serde::{Deserialize, Serialize};

/// Center MIDI pan.
pub const CENTER_PAN: u8 = 64;

/// Assigns and recycles stereo pan values for active voices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanningManager {
    num_voices: usize,
    stereo_width: u8,

    /// All candidate pan values, in assigning (middle-out) order.
    assigning_order: Vec<u8>,

    /// Candidates not currently held by a voice, in assigning order.
    unsent: Vec<u8>,
}

impl PanningManager {
    pub fn new() -> Self {
        Self {
            num_voices: 0,
            stereo_width: 64,
            assigning_order: Vec::new(),
            unsent: Vec::new(),
        }
    }

    /// Sizes the candidate set for `num_voices` and refills the pool.
    pub fn prepare(&mut self, num_voices: usize) {
        self.num_voices = num_voices;
        self.rebuild();
        self.refill_pool(false);
    }

    /// Current stereo width in [0, 100].
    pub fn stereo_width(&self) -> u8 {
        self.stereo_width
    }

    /// Changes the stereo width. Values already held by voices stay with
    /// their voices; pooled values are remapped to the closest new
    /// candidates.
    pub fn set_stereo_width(&mut self, width: u8) {
        self.stereo_width = width.min(100);

        if self.num_voices == 0 {
            return;
        }

        let pool_was_full = self.unsent.len() == self.assigning_order.len();
        self.rebuild();

        if pool_was_full {
            self.refill_pool(false);
            return;
        }

        // Every candidate is held by a voice; the pool stays empty until
        // those voices release.
        if self.unsent.is_empty() {
            return;
        }

        // Some voices hold pan values: remap each pooled value to the
        // closest unconsumed new candidate.
        let old_unsent = std::mem::take(&mut self.unsent);
        let mut available = self.assigning_order.clone();

        for old in &old_unsent {
            if let Some(new) = take_closest(&mut available, *old) {
                self.unsent.push(new);
            }
        }
    }

    /// Pops the next pan value in middle-out order. An exhausted pool
    /// refills itself (minus the center value, which is returned).
    pub fn next_pan(&mut self) -> u8 {
        if let Some(pan) = self.unsent.first().copied() {
            self.unsent.remove(0);
            return pan;
        }

        self.refill_pool(true);
        CENTER_PAN
    }

    /// Returns a pan value to the pool, keeping assigning order.
    pub fn pan_released(&mut self, pan: u8) {
        let Some(target_index) = self.assigning_order.iter().position(|&p| p == pan) else {
            return;
        };

        if self.unsent.contains(&pan) {
            return;
        }

        let insert_at = self
            .unsent
            .iter()
            .position(|&queued| {
                self.assigning_order
                    .iter()
                    .position(|&p| p == queued)
                    .map_or(true, |index| index > target_index)
            })
            .unwrap_or(self.unsent.len());

        self.unsent.insert(insert_at, pan);
    }

    /// Refills the pool with every candidate, optionally skipping the
    /// first (center) value because it was just handed out.
    pub fn refill_pool(&mut self, center_taken: bool) {
        self.unsent.clear();
        let start = usize::from(center_taken);
        self.unsent
            .extend(self.assigning_order.iter().skip(start).copied());
    }

    /// Recomputes the candidate set for the current width and count.
    fn rebuild(&mut self) {
        self.assigning_order.clear();

        if self.num_voices == 0 {
            return;
        }

        let width = self.stereo_width as f32 / 100.0;
        let max_pan = 63.5 + 63.5 * width;
        let min_pan = 63.5 - 63.5 * width;
        let increment = (max_pan - min_pan) / self.num_voices as f32;

        // Candidates ascending from hard left to hard right.
        let ascending: Vec<u8> = (0..self.num_voices)
            .map(|i| {
                (min_pan + i as f32 * increment + increment / 2.0)
                    .round()
                    .clamp(0.0, 127.0) as u8
            })
            .collect();

        // Reorder middle-out: center, one step right, one step left, two
        // steps right, ...
        let middle = if self.num_voices > 1 {
            self.num_voices / 2
        } else {
            0
        };

        self.assigning_order.push(ascending[middle]);
        let mut above = 1isize;
        let mut below = -1isize;

        for i in 1..self.num_voices {
            let up = middle as isize + above;
            let down = middle as isize + below;

            let index = if i % 2 == 1 {
                if (up as usize) < self.num_voices {
                    above += 1;
                    up
                } else {
                    below -= 1;
                    down
                }
            } else if down >= 0 {
                below -= 1;
                down
            } else {
                above += 1;
                up
            };

            self.assigning_order.push(ascending[index as usize]);
        }
    }
}

impl Default for PanningManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes and returns the element of `values` closest to `target`.
fn take_closest(values: &mut Vec<u8>, target: u8) -> Option<u8> {
    if values.is_empty() {
        return None;
    }

    let mut best_index = 0;
    let mut best_distance = u8::MAX;
    for (i, &value) in values.iter().enumerate() {
        let distance = value.abs_diff(target);
        if distance < best_distance {
            best_distance = distance;
            best_index = i;
            if distance == 0 {
                break;
            }
        }
    }

    Some(values.remove(best_index))
}

/// Per-voice equal-sum stereo panner with block-ramp support.
///
/// Gains follow the MIDI convention used throughout the engine:
/// `left = 1 - pan/127`, `right = pan/127`.
#[derive(Debug, Clone, Copy)]
pub struct StereoPanner {
    midi_pan: u8,
    left_gain: f32,
    right_gain: f32,
    prev_left_gain: f32,
    prev_right_gain: f32,
}

impl StereoPanner {
    pub fn new() -> Self {
        let (left, right) = gains_for(CENTER_PAN);
        Self {
            midi_pan: CENTER_PAN,
            left_gain: left,
            right_gain: right,
            prev_left_gain: left,
            prev_right_gain: right,
        }
    }

    /// Sets a new pan position. The previous gains are retained so the
    /// next rendered block can ramp to the new position.
    pub fn set_pan(&mut self, pan: u8) {
        let pan = pan.min(127);
        if pan == self.midi_pan {
            return;
        }

        self.prev_left_gain = self.left_gain;
        self.prev_right_gain = self.right_gain;
        self.midi_pan = pan;
        let (left, right) = gains_for(pan);
        self.left_gain = left;
        self.right_gain = right;
    }

    /// Marks the end of a rendered block: future ramps start from the
    /// current position.
    pub fn latch(&mut self) {
        self.prev_left_gain = self.left_gain;
        self.prev_right_gain = self.right_gain;
    }

    pub fn pan(&self) -> u8 {
        self.midi_pan
    }

    pub fn left_gain(&self) -> f32 {
        self.left_gain
    }

    pub fn right_gain(&self) -> f32 {
        self.right_gain
    }

    pub fn prev_left_gain(&self) -> f32 {
        self.prev_left_gain
    }

    pub fn prev_right_gain(&self) -> f32 {
        self.prev_right_gain
    }
}

impl Default for StereoPanner {
    fn default() -> Self {
        Self::new()
    }
}

fn gains_for(pan: u8) -> (f32, f32) {
    let right = pan as f32 / 127.0;
    (1.0 - right, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pan_is_center() {
        // With an odd voice count one candidate sits exactly at center.
        let mut panner = PanningManager::new();
        panner.prepare(5);
        panner.set_stereo_width(100);
        assert_eq!(panner.next_pan(), CENTER_PAN);
    }

    #[test]
    fn test_pans_alternate_outward() {
        let mut panner = PanningManager::new();
        panner.prepare(5);
        panner.set_stereo_width(100);

        let first = panner.next_pan() as i32;
        let second = panner.next_pan() as i32;
        let third = panner.next_pan() as i32;

        assert_eq!(first, 64);
        assert!(second > 64, "second voice should sit right of center");
        assert!(third < 64, "third voice should sit left of center");
        assert!(
            ((second - 64) + (third - 64)).abs() <= 2,
            "sides should be near-symmetric: {} and {}",
            second,
            third
        );
    }

    #[test]
    fn test_all_pans_distinct() {
        let mut panner = PanningManager::new();
        panner.prepare(16);
        panner.set_stereo_width(100);

        let mut seen = Vec::new();
        for _ in 0..16 {
            let pan = panner.next_pan();
            assert!(!seen.contains(&pan), "duplicate pan {}", pan);
            seen.push(pan);
        }
    }

    #[test]
    fn test_zero_width_collapses_to_center() {
        let mut panner = PanningManager::new();
        panner.prepare(4);
        panner.set_stereo_width(0);

        for _ in 0..4 {
            assert_eq!(panner.next_pan(), CENTER_PAN);
        }
    }

    #[test]
    fn test_released_pan_is_reassigned() {
        let mut panner = PanningManager::new();
        panner.prepare(4);
        panner.set_stereo_width(100);

        let first = panner.next_pan();
        let second = panner.next_pan();
        panner.pan_released(first);

        // The released innermost value comes back before outer values.
        assert_eq!(panner.next_pan(), first);
        assert_ne!(panner.next_pan(), second);
    }

    #[test]
    fn test_exhausted_pool_returns_center() {
        let mut panner = PanningManager::new();
        panner.prepare(2);
        panner.set_stereo_width(100);

        panner.next_pan();
        panner.next_pan();
        assert_eq!(panner.next_pan(), CENTER_PAN);
    }

    #[test]
    fn test_width_change_remaps_pool() {
        let mut panner = PanningManager::new();
        panner.prepare(4);
        panner.set_stereo_width(100);

        let _held = panner.next_pan();
        panner.set_stereo_width(50);

        // Three values remain poolable and stay within the narrower field.
        for _ in 0..3 {
            let pan = panner.next_pan() as i32;
            assert!((64 - pan).abs() <= 32, "pan {} outside 50% width", pan);
        }
    }

    #[test]
    fn test_stereo_panner_gains() {
        let mut panner = StereoPanner::new();
        assert!((panner.left_gain() - panner.right_gain()).abs() < 0.01);

        panner.set_pan(127);
        assert_eq!(panner.left_gain(), 0.0);
        assert_eq!(panner.right_gain(), 1.0);

        // Previous gains ramp from center until latched.
        assert!((panner.prev_left_gain() - 0.496).abs() < 0.01);
        panner.latch();
        assert_eq!(panner.prev_left_gain(), 0.0);
    }
}
