//! Grain Extraction Module
//!
//! Identifies pitch-synchronous analysis grains for overlap-add
//! resynthesis. For each pitch period of the input, one peak of signal
//! energy is located; each grain is two periods long, Hann-windowed, and
//! centered on its peak, so neighboring grains overlap by one period.
//!
//! Peak picking walks one-period analysis windows across the block. Within
//! each window, up to ten candidate extremes are collected by an expanding
//! search outward from the predicted peak position, then the winner is
//! chosen by a jitter criterion: how little it would misalign the output
//! grain stream relative to the two previous peaks.

use crate::sample::Sample;

/// Maximum peak candidates collected per analysis window.
const NUM_PEAKS_TO_TEST: usize = 10;

/// Candidates kept after delta screening, from which the strongest peak
/// is chosen.
const FINAL_HANDFUL_SIZE: usize = 5;

/// The continuous-stream delta (two peaks back) matters more than the
/// overlapping-neighbor delta (one peak back).
const STREAM_DELTA_WEIGHT: f32 = 1.5;

/// PSOLA grain-onset extractor.
///
/// All scratch storage is allocated in [`prepare`](GrainExtractor::prepare)
/// and reused; extraction itself does not allocate.
#[derive(Debug, Clone, Default)]
pub struct GrainExtractor {
    peak_indices: Vec<i32>,
    peak_candidates: Vec<i32>,
    search_order: Vec<i32>,
    candidate_deltas: Vec<f32>,
    final_handful: Vec<i32>,
    final_handful_deltas: Vec<f32>,
    grain_onsets: Vec<i32>,
}

impl GrainExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves scratch storage for blocks up to `max_blocksize` samples.
    pub fn prepare(&mut self, max_blocksize: usize) {
        self.peak_indices.reserve(max_blocksize);
        self.grain_onsets.reserve(max_blocksize);
        self.search_order.reserve(max_blocksize);
        self.peak_candidates.reserve(NUM_PEAKS_TO_TEST + 1);
        self.candidate_deltas.reserve(NUM_PEAKS_TO_TEST + 1);
        self.final_handful.reserve(FINAL_HANDFUL_SIZE);
        self.final_handful_deltas.reserve(FINAL_HANDFUL_SIZE);
    }

    /// Frees all scratch storage.
    pub fn release(&mut self) {
        self.peak_indices = Vec::new();
        self.peak_candidates = Vec::new();
        self.search_order = Vec::new();
        self.candidate_deltas = Vec::new();
        self.final_handful = Vec::new();
        self.final_handful_deltas = Vec::new();
        self.grain_onsets = Vec::new();
    }

    /// Returns the sorted sample indices at which analysis grains start,
    /// for the given input block and pitch period. Each grain spans
    /// `[onset, onset + 2 * period)`.
    ///
    /// `period` must be >= 2. The result is non-empty whenever the input
    /// holds at least one period of audio.
    pub fn extract_grain_onsets<S: Sample>(&mut self, input: &[S], period: usize) -> &[i32] {
        debug_assert!(period >= 2);

        self.find_psola_peaks(input, period);

        // Convert peaks to grain onsets: offsetting each peak back by one
        // period centers it in its two-period grain.
        let period = period as i32;
        let last = self.peak_indices.len().saturating_sub(1);
        self.grain_onsets.clear();

        for (i, &peak) in self.peak_indices.iter().enumerate() {
            let onset = if peak - period >= 0 {
                peak - period
            } else if i < last {
                // A later peak's grain will cover this region.
                continue;
            } else if peak - period / 2 >= 0 {
                peak - period / 2
            } else {
                peak
            };

            if self.grain_onsets.last().map_or(true, |&prev| onset > prev) {
                self.grain_onsets.push(onset);
            }
        }

        &self.grain_onsets
    }

    /// Locates one energy peak per pitch period of the input.
    fn find_psola_peaks<S: Sample>(&mut self, input: &[S], period: usize) {
        self.peak_indices.clear();

        let num_samples = input.len() as i32;
        let period = period as i32;
        let output_grain = 2 * period;
        let half_period = (period as f32 / 2.0).ceil() as i32;

        // Marks the center of the current one-period analysis window,
        // which is also the predicted location of its peak.
        let mut analysis_index: i32 = 0;

        while analysis_index - half_period < num_samples {
            let window_start = (analysis_index - half_period).max(0);
            let window_end = (window_start + period).min(num_samples);

            self.peak_candidates.clear();

            if window_start == window_end {
                if window_end == num_samples {
                    break;
                }
                self.peak_candidates.push(window_start);
            } else {
                let predicted = analysis_index.clamp(window_start, window_end - 1);
                sort_indices_for_peak_search(
                    &mut self.search_order,
                    window_start,
                    window_end,
                    predicted,
                );

                while self.peak_candidates.len() < NUM_PEAKS_TO_TEST {
                    get_peak_candidate_in_range(
                        &mut self.peak_candidates,
                        input,
                        window_start,
                        window_end,
                        predicted,
                        &self.search_order,
                    );

                    let len = self.peak_candidates.len();
                    if len > 2 && self.peak_candidates[len - 1] == self.peak_candidates[len - 2] {
                        break;
                    }
                }
            }

            let peak = if self.peak_candidates.len() == 1 {
                self.peak_candidates[0]
            } else if self.peak_indices.len() > 1 {
                let last = self.peak_indices[self.peak_indices.len() - 1];
                let second_to_last = self.peak_indices[self.peak_indices.len() - 2];
                self.choose_ideal_peak_candidate(
                    input,
                    last + period,
                    second_to_last + output_grain,
                )
            } else {
                // For the first two peaks there are no deltas to compare,
                // so take the point of greatest energy.
                strongest_candidate(input, &self.peak_candidates)
            };

            self.peak_indices.push(peak);

            // The next analysis window is centered where the next peak is
            // expected: one period past the last peak, or two periods past
            // the second-to-last to preserve stream continuity.
            let next = if self.peak_indices.len() == 1 {
                peak + period
            } else {
                self.peak_indices[self.peak_indices.len() - 2] + output_grain
            };

            // The expected position normally advances by about one period
            // per window; never let it stall.
            analysis_index = next.max(analysis_index + 1);
        }
    }

    /// Chooses among peak candidates by jitter: `target1` is where the
    /// neighboring overlapping grain expects this peak, `target2` where
    /// the same-stream consecutive grain expects it.
    fn choose_ideal_peak_candidate<S: Sample>(
        &mut self,
        input: &[S],
        target1: i32,
        target2: i32,
    ) -> i32 {
        self.candidate_deltas.clear();
        for &candidate in &self.peak_candidates {
            let delta1 = (candidate - target1).abs() as f32;
            let delta2 = (candidate - target2).abs() as f32 * STREAM_DELTA_WEIGHT;
            self.candidate_deltas.push((delta1 + delta2) / 2.0);
        }

        // Keep the handful of candidates with the smallest deltas, in
        // ascending delta order.
        let handful_size = FINAL_HANDFUL_SIZE.min(self.candidate_deltas.len());
        self.final_handful.clear();
        self.final_handful_deltas.clear();

        for _ in 0..handful_size {
            let mut min_delta = f32::MAX;
            let mut min_index = 0;
            for (i, &delta) in self.candidate_deltas.iter().enumerate() {
                if delta < min_delta {
                    min_delta = delta;
                    min_index = i;
                }
            }

            self.final_handful.push(self.peak_candidates[min_index]);
            self.final_handful_deltas.push(min_delta);
            self.candidate_deltas[min_index] = f32::MAX;
        }

        let lowest_delta = self.final_handful_deltas[0];
        let delta_range = self.final_handful_deltas[handful_size - 1] - lowest_delta;

        if delta_range < 1.0 {
            return self.final_handful[0];
        }

        // Strongest absolute signal wins, discounted by how much jitter
        // the candidate would introduce. Ties go to the lower delta.
        let mut chosen = self.final_handful[0];
        let mut strongest = sample_abs(input, chosen);

        for (&candidate, &delta) in self.final_handful.iter().zip(&self.final_handful_deltas) {
            let weight = 1.0 - 0.75 * (delta - lowest_delta) / delta_range;
            let strength = sample_abs(input, candidate) * weight;

            if strength > strongest {
                strongest = strength;
                chosen = candidate;
            }
        }

        chosen
    }
}

/// `|input[index]|` as f32.
fn sample_abs<S: Sample>(input: &[S], index: i32) -> f32 {
    input[index as usize].abs().as_f64() as f32
}

/// The candidate with the greatest absolute signal value.
fn strongest_candidate<S: Sample>(input: &[S], candidates: &[i32]) -> i32 {
    let mut strongest_index = candidates[0];
    let mut strongest = sample_abs(input, strongest_index);

    for &candidate in candidates {
        let current = sample_abs(input, candidate);
        if current > strongest {
            strongest = current;
            strongest_index = candidate;
        }
    }

    strongest_index
}

/// Writes the window's sample indices in expanding order outward from the
/// predicted peak: predicted, +1, -1, +2, -2, ... clamped to the window.
fn sort_indices_for_peak_search(
    output: &mut Vec<i32>,
    window_start: i32,
    window_end: i32,
    predicted_peak: i32,
) {
    output.clear();
    output.push(predicted_peak);

    let mut p = 1;
    let mut m = -1;

    for n in 1..(window_end - window_start) {
        let pos = predicted_peak + p;
        let neg = predicted_peak + m;

        if n % 2 == 0 {
            if neg >= window_start {
                output.push(neg);
                m -= 1;
            } else {
                output.push(pos);
                p += 1;
            }
        } else if pos < window_end {
            output.push(pos);
            p += 1;
        } else {
            output.push(neg);
            m -= 1;
        }
    }
}

/// Adds the next local extreme(s) of the window to `candidates`, weighted
/// by a triangular function favoring samples near the predicted peak.
fn get_peak_candidate_in_range<S: Sample>(
    candidates: &mut Vec<i32>,
    input: &[S],
    window_start: i32,
    window_end: i32,
    predicted_peak: i32,
    search_order: &[i32],
) {
    let num_samples = window_end - window_start;

    let starting = if candidates.contains(&predicted_peak) {
        // Nearest sample to the predicted peak not already chosen.
        match search_order
            .iter()
            .skip(1)
            .copied()
            .find(|s| !candidates.contains(s))
        {
            Some(s) => s,
            None => {
                // Window exhausted; repeat a value so the caller's
                // consecutive-duplicate check terminates the loop.
                candidates.push(predicted_peak);
                return;
            }
        }
    } else {
        predicted_peak
    };

    let weight = |index: i32| {
        1.0 - ((index - predicted_peak).abs() as f32 / num_samples as f32) * 0.5
    };

    let mut local_min = input[starting as usize].as_f64() as f32 * weight(starting);
    let mut local_max = local_min;
    let mut index_of_min = starting;
    let mut index_of_max = starting;

    for &index in search_order {
        if index == starting || candidates.contains(&index) {
            continue;
        }

        let current = input[index as usize].as_f64() as f32 * weight(index);

        if current < local_min {
            local_min = current;
            index_of_min = index;
        }
        if current > local_max {
            local_max = current;
            index_of_max = index;
        }
    }

    if index_of_max == index_of_min {
        candidates.push(index_of_max);
        return;
    }

    // Both extremes on one side of zero: only the outermost is a real
    // energy peak.
    if local_max < 0.0 {
        candidates.push(index_of_min);
        return;
    }
    if local_min > 0.0 {
        candidates.push(index_of_max);
        return;
    }

    candidates.push(index_of_max.min(index_of_min));
    candidates.push(index_of_max.max(index_of_min));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine_block(period: usize, num_samples: usize) -> Vec<f32> {
        (0..num_samples)
            .map(|i| (TAU * i as f64 / period as f64).sin() as f32 * 0.5)
            .collect()
    }

    #[test]
    fn test_onsets_sorted_and_in_range() {
        let mut grains = GrainExtractor::new();
        grains.prepare(512);

        let input = sine_block(100, 512);
        let onsets = grains.extract_grain_onsets(&input, 100);

        assert!(!onsets.is_empty());
        for pair in onsets.windows(2) {
            assert!(pair[0] < pair[1], "onsets must be strictly ascending");
        }
        for &onset in onsets {
            assert!(onset >= 0 && (onset as usize) < input.len());
        }
    }

    #[test]
    fn test_grain_spacing_tracks_period() {
        let mut grains = GrainExtractor::new();
        grains.prepare(2048);

        let period = 120;
        let input = sine_block(period, 2048);
        let onsets = grains.extract_grain_onsets(&input, period);

        assert!(onsets.len() >= 8, "expected several grains, got {}", onsets.len());

        // Interior spacing should be about one period.
        for pair in onsets[1..onsets.len() - 1].windows(2) {
            let spacing = pair[1] - pair[0];
            assert!(
                spacing >= period as i32 / 2 && spacing <= period as i32 * 2,
                "grain spacing {} far from period {}",
                spacing,
                period
            );
        }
    }

    #[test]
    fn test_peaks_land_near_energy_maxima() {
        let mut grains = GrainExtractor::new();
        grains.prepare(1024);

        let period = 128;
        let input = sine_block(period, 1024);
        let onsets = grains.extract_grain_onsets(&input, period);

        // Each interior grain center (onset + period) should carry
        // significant energy for a clean sine.
        for &onset in &onsets[1..] {
            let center = onset as usize + period;
            if center < input.len() {
                assert!(
                    input[center].abs() > 0.1,
                    "grain centered on a low-energy sample: {}",
                    input[center]
                );
            }
        }
    }

    #[test]
    fn test_input_shorter_than_period_still_yields_a_grain() {
        let mut grains = GrainExtractor::new();
        grains.prepare(64);

        let input = sine_block(100, 64);
        let onsets = grains.extract_grain_onsets(&input, 100);

        assert!(!onsets.is_empty());
        assert!(onsets[0] >= 0);
    }

    #[test]
    fn test_noise_input_does_not_panic() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);

        let mut grains = GrainExtractor::new();
        grains.prepare(512);

        let input: Vec<f32> = (0..512).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
        for period in [24, 50, 60] {
            let onsets = grains.extract_grain_onsets(&input, period);
            assert!(!onsets.is_empty());
            for pair in onsets.windows(2) {
                assert!(pair[0] < pair[1]);
            }
        }
    }

    #[test]
    fn test_minimum_period_contract() {
        let mut grains = GrainExtractor::new();
        grains.prepare(64);

        let input = sine_block(4, 64);
        let onsets = grains.extract_grain_onsets(&input, 2);
        assert!(!onsets.is_empty());
    }
}
