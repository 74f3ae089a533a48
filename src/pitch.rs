//! Pitch Detection Module
//!
//! Time-domain fundamental frequency estimation based on the Average
//! Squared Difference Function (ASDF). One estimate is produced per
//! analysis block; "unvoiced" is a normal, frequent result for breath,
//! consonants and silence, not an error.
//!
//! # Algorithm
//!
//! For every candidate lag k in the detectable period range, the detector
//! sums squared differences between the input and a copy of itself delayed
//! by k, over a window centered on the middle of the block. The lag with
//! the smallest normalized difference is the period estimate. Octave
//! errors are suppressed two ways: the lag range is constrained so the
//! pitch cannot halve or double between consecutive voiced frames, and
//! when several lags score similarly, candidates are re-weighted by their
//! distance from the previous estimate.

use crate::error::ConfigError;
use crate::sample::Sample;

/// Number of ASDF local minima examined when no single lag wins outright.
const PERIOD_CANDIDATES_TO_TEST: usize = 15;

/// Written to lags outside the per-frame search range so they can never be
/// chosen as a minimum.
const LAG_SENTINEL: f64 = 1000.0;

/// If the confidence spread across all period candidates is below this,
/// the smallest candidate lag wins (avoids octave-up errors).
const CANDIDATE_CONFIDENCE_SPREAD: f32 = 0.35;

/// If the candidates' distances from the previous period all fall within
/// this many samples of each other, delta weighting is skipped.
const DELTA_RANGE_FLOOR: f64 = 4.0;

/// Lags whose clamped analysis window would hold fewer pairs than this are
/// excluded from the search.
const MIN_WINDOW_PAIRS: usize = 4;

/// The result of analyzing one block of input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchEstimate {
    /// A fundamental was found.
    Voiced {
        /// Estimated period in samples (fractional, via peak interpolation).
        period: f64,
        /// Estimated fundamental frequency in Hz.
        hz: f32,
    },

    /// No clear fundamental in this block.
    Unvoiced,
}

impl PitchEstimate {
    /// True if a fundamental was found.
    pub fn is_voiced(&self) -> bool {
        matches!(self, PitchEstimate::Voiced { .. })
    }

    /// The estimated frequency, if voiced.
    pub fn hz(&self) -> Option<f32> {
        match self {
            PitchEstimate::Voiced { hz, .. } => Some(*hz),
            PitchEstimate::Unvoiced => None,
        }
    }

    /// The estimated period in samples, if voiced.
    pub fn period(&self) -> Option<f64> {
        match self {
            PitchEstimate::Voiced { period, .. } => Some(*period),
            PitchEstimate::Unvoiced => None,
        }
    }
}

/// ASDF pitch detector.
#[derive(Debug, Clone)]
pub struct PitchDetector<S: Sample> {
    min_hz: f32,
    max_hz: f32,
    samplerate: f64,

    /// Smallest detectable period in samples (= samplerate / max_hz).
    min_period: usize,
    /// Largest detectable period in samples (= samplerate / min_hz).
    max_period: usize,

    /// Confidence above this means the frame is unvoiced.
    upper_confidence_thresh: f32,
    /// Confidence below this is accepted immediately without candidate
    /// comparison.
    lower_confidence_thresh: f32,

    /// One normalized difference value per lag; index 0 is `min_period`.
    asdf: Vec<S>,

    last_frame_was_voiced: bool,
    last_estimated_period: f64,

    // Scratch storage reused across frames.
    candidates: Vec<usize>,
    candidate_deltas: Vec<f64>,
}

impl<S: Sample> PitchDetector<S> {
    /// Creates a detector for the given frequency range.
    pub fn new(min_hz: f32, max_hz: f32, samplerate: f64) -> Result<Self, ConfigError> {
        if samplerate <= 0.0 {
            return Err(ConfigError::InvalidSamplerate(samplerate));
        }

        let mut detector = Self {
            min_hz: 0.0,
            max_hz: 0.0,
            samplerate,
            min_period: 0,
            max_period: 0,
            upper_confidence_thresh: 0.15,
            lower_confidence_thresh: 0.05,
            asdf: Vec::new(),
            last_frame_was_voiced: false,
            last_estimated_period: 0.0,
            candidates: Vec::with_capacity(PERIOD_CANDIDATES_TO_TEST),
            candidate_deltas: Vec::with_capacity(PERIOD_CANDIDATES_TO_TEST),
        };
        detector.set_hz_range(min_hz, max_hz)?;
        detector.last_estimated_period = detector.min_period as f64;
        Ok(detector)
    }

    /// Changes the detectable frequency range and resizes the ASDF buffer.
    pub fn set_hz_range(&mut self, min_hz: f32, max_hz: f32) -> Result<(), ConfigError> {
        if min_hz <= 0.0 || max_hz <= 0.0 || min_hz >= max_hz {
            return Err(ConfigError::InvalidHzRange {
                min: min_hz,
                max: max_hz,
            });
        }

        self.min_hz = min_hz;
        self.max_hz = max_hz;
        self.recalculate_period_range();
        Ok(())
    }

    /// Changes the samplerate, rescaling the remembered last period so
    /// pitch continuity holds across the change.
    pub fn set_samplerate(&mut self, samplerate: f64) -> Result<(), ConfigError> {
        if samplerate <= 0.0 {
            return Err(ConfigError::InvalidSamplerate(samplerate));
        }

        if self.last_frame_was_voiced && self.last_estimated_period > 0.0 {
            let last_hz = self.samplerate / self.last_estimated_period;
            self.last_estimated_period = samplerate / last_hz;
        }

        self.samplerate = samplerate;
        self.recalculate_period_range();
        Ok(())
    }

    /// Sets the unvoiced gate (`upper`) and the fast-accept gate (`lower`).
    pub fn set_confidence_thresh(&mut self, upper: f32, lower: f32) -> Result<(), ConfigError> {
        if upper <= 0.0 || lower <= 0.0 || lower > upper {
            return Err(ConfigError::InvalidConfidenceThresh { upper, lower });
        }
        self.upper_confidence_thresh = upper;
        self.lower_confidence_thresh = lower;
        Ok(())
    }

    /// Smallest detectable period in samples.
    pub fn min_period(&self) -> usize {
        self.min_period
    }

    /// Largest detectable period in samples.
    pub fn max_period(&self) -> usize {
        self.max_period
    }

    /// Configured detectable frequency range in Hz.
    pub fn hz_range(&self) -> (f32, f32) {
        (self.min_hz, self.max_hz)
    }

    /// Configured confidence thresholds `(upper, lower)`.
    pub fn confidence_thresh(&self) -> (f32, f32) {
        (
            self.upper_confidence_thresh,
            self.lower_confidence_thresh,
        )
    }

    /// Forgets the previous frame so the next estimate starts cold.
    pub fn reset(&mut self) {
        self.last_frame_was_voiced = false;
        self.last_estimated_period = self.min_period as f64;
    }

    /// Analyzes one block of mono input and returns a pitch estimate.
    pub fn detect_pitch(&mut self, input: &[S]) -> PitchEstimate {
        let num_samples = input.len();

        if num_samples < self.min_period {
            self.last_frame_was_voiced = false;
            return PitchEstimate::Unvoiced;
        }

        // The global period range can often be constrained further for
        // this specific frame.
        let frame_max = self.max_period.min(num_samples.saturating_sub(1));
        let mut min_lag = samples_to_first_zero_crossing(input).max(self.min_period);
        let mut max_lag = frame_max;

        if self.last_frame_was_voiced {
            // Pitch shouldn't halve or double between consecutive voiced
            // frames.
            min_lag = min_lag.max((self.last_estimated_period * 0.5).round() as usize);
            max_lag = max_lag.min((self.last_estimated_period * 2.0).round() as usize);
        }

        if max_lag < min_lag {
            self.last_frame_was_voiced = false;
            return PitchEstimate::Unvoiced;
        }

        if min_lag == max_lag {
            if min_lag > self.min_period {
                min_lag -= 1;
            } else if max_lag < frame_max {
                max_lag += 1;
            } else {
                self.last_frame_was_voiced = false;
                return PitchEstimate::Unvoiced;
            }
        }

        self.compute_asdf(input, min_lag, max_lag);

        let data_size = self.max_period - self.min_period + 1;
        let min_index = index_of_min(&self.asdf[..data_size]);
        let greatest_confidence = self.asdf[min_index].as_f64() as f32;

        if greatest_confidence > self.upper_confidence_thresh {
            self.last_frame_was_voiced = false;
            return PitchEstimate::Unvoiced;
        }

        if !self.last_frame_was_voiced || greatest_confidence < self.lower_confidence_thresh {
            return self.found_the_period(min_index);
        }

        self.choose_ideal_period_candidate(min_index)
    }

    /// Fills the ASDF buffer for every lag in the global range, writing a
    /// sentinel to lags outside `[min_lag, max_lag]`.
    fn compute_asdf(&mut self, input: &[S], min_lag: usize, max_lag: usize) {
        let num_samples = input.len();
        let middle = (num_samples / 2) as isize;
        let half_width = ((num_samples - 1) / 2) as isize;
        let sentinel = S::coerce(LAG_SENTINEL);

        for k in self.min_period..=self.max_period {
            let index = k - self.min_period;

            if k < min_lag || k > max_lag || k >= num_samples {
                self.asdf[index] = sentinel;
                continue;
            }

            // Difference window centered on the middle of the block,
            // clamped so both taps stay inside the input.
            let offset = middle - (k / 2) as isize;
            let start = (offset - half_width).max(0) as usize;
            let end = (((offset + half_width).max(0)) as usize).min(num_samples - k);

            if end <= start || end - start < MIN_WINDOW_PAIRS {
                self.asdf[index] = sentinel;
                continue;
            }

            let mut sum = 0.0f64;
            for s in start..end {
                let difference = (input[s] - input[s + k]).as_f64();
                sum += difference * difference;
            }

            self.asdf[index] = S::coerce(sum / (end - start) as f64);
        }
    }

    /// Accepts the lag at `index` after quadratic peak interpolation.
    fn found_the_period(&mut self, index: usize) -> PitchEstimate {
        let data_size = self.max_period - self.min_period + 1;
        let refined_lag = quadratic_peak_position(&self.asdf[..data_size], index);
        let real_period = refined_lag + self.min_period as f64;

        if real_period > self.max_period as f64 || real_period < self.min_period as f64 {
            self.last_frame_was_voiced = false;
            return PitchEstimate::Unvoiced;
        }

        self.last_estimated_period = real_period;
        self.last_frame_was_voiced = true;

        PitchEstimate::Voiced {
            period: real_period,
            hz: (self.samplerate / real_period) as f32,
        }
    }

    /// Picks between competing ASDF minima, weighting each candidate by its
    /// distance from the previous frame's period.
    fn choose_ideal_period_candidate(&mut self, min_index: usize) -> PitchEstimate {
        let data_size = self.max_period - self.min_period + 1;
        let candidate_count = PERIOD_CANDIDATES_TO_TEST.min(data_size);

        self.candidates.clear();
        self.candidates.push(min_index);
        for _ in 1..candidate_count {
            next_best_period_candidate(&mut self.candidates, &self.asdf[..data_size]);
        }

        if self.candidates.len() == 1 {
            return self.found_the_period(min_index);
        }

        // Lower ASDF value = higher confidence.
        let greatest_confidence = self.asdf[min_index].as_f64();
        let least_confidence = self
            .candidates
            .iter()
            .map(|&c| self.asdf[c].as_f64())
            .fold(greatest_confidence, f64::max);

        // Little variation in confidence: return the smallest lag that is
        // a candidate, to avoid favoring a higher octave.
        if (least_confidence - greatest_confidence) < CANDIDATE_CONFIDENCE_SPREAD as f64 {
            let smallest = self.candidates.iter().copied().min().unwrap_or(min_index);
            return self.found_the_period(smallest);
        }

        // Delta: how far each candidate is from the last estimated period.
        self.candidate_deltas.clear();
        for &candidate in &self.candidates {
            let period = (candidate + self.min_period) as f64;
            self.candidate_deltas
                .push((period - self.last_estimated_period).abs());
        }

        let min_delta = self.candidate_deltas.iter().copied().fold(f64::MAX, f64::min);
        let max_delta = self.candidate_deltas.iter().copied().fold(0.0, f64::max);
        let delta_range = max_delta - min_delta;

        if delta_range < DELTA_RANGE_FLOOR {
            return self.found_the_period(min_index);
        }

        // Higher delta = less plausible: inflate those candidates' ASDF
        // values before choosing the minimum.
        let mut chosen = self.candidates[0];
        let mut best_weighted = f64::MAX;

        for (&candidate, &delta) in self.candidates.iter().zip(&self.candidate_deltas) {
            let confidence = self.asdf[candidate].as_f64();
            let weighted = if delta == 0.0 {
                confidence
            } else {
                confidence * (1.0 + (delta / delta_range) * 0.5)
            };

            if weighted < best_weighted {
                best_weighted = weighted;
                chosen = candidate;
            }
        }

        self.found_the_period(chosen)
    }

    fn recalculate_period_range(&mut self) {
        self.max_period = (self.samplerate / self.min_hz as f64).round() as usize;
        self.min_period = ((self.samplerate / self.max_hz as f64).round() as usize).max(1);

        if self.max_period <= self.min_period {
            self.max_period = self.min_period + 1;
        }

        let lag_count = self.max_period - self.min_period + 1;
        self.asdf.clear();
        self.asdf.resize(lag_count, S::zero());
    }
}

/// Index of the first zero crossing (by sign change or exact zero), or 0
/// if the input never crosses.
fn samples_to_first_zero_crossing<S: Sample>(input: &[S]) -> usize {
    if input.is_empty() || input[0] == S::zero() {
        return 0;
    }

    let started_positive = input[0] > S::zero();

    for (s, &sample) in input.iter().enumerate().skip(1) {
        if sample == S::zero() {
            return s;
        }
        if (sample > S::zero()) != started_positive {
            return s;
        }
    }

    0
}

/// Index of the smallest element, short-circuiting on an exact zero.
fn index_of_min<S: Sample>(data: &[S]) -> usize {
    let mut min = data[0];
    if min == S::zero() {
        return 0;
    }

    let mut min_index = 0;
    for (n, &current) in data.iter().enumerate().skip(1) {
        if current == S::zero() {
            return n;
        }
        if current < min {
            min = current;
            min_index = n;
        }
    }

    min_index
}

/// Adds the smallest ASDF minimum not already chosen to `candidates`.
fn next_best_period_candidate<S: Sample>(candidates: &mut Vec<usize>, asdf: &[S]) {
    let init_index = match (0..asdf.len()).find(|i| !candidates.contains(i)) {
        Some(i) => i,
        None => return,
    };

    let mut min = asdf[init_index];
    let mut min_index = init_index;

    for (i, &current) in asdf.iter().enumerate() {
        if i == init_index || candidates.contains(&i) {
            continue;
        }

        if current == S::zero() {
            candidates.push(i);
            return;
        }

        if current < min {
            min = current;
            min_index = i;
        }
    }

    candidates.push(min_index);
}

/// Parabolic interpolation of the minimum around `pos`, in fractional
/// index units.
fn quadratic_peak_position<S: Sample>(data: &[S], pos: usize) -> f64 {
    if pos == 0 || pos + 1 >= data.len() {
        return pos as f64;
    }

    let s1 = data[pos].as_f64();
    if s1 == 0.0 {
        return pos as f64;
    }

    let s0 = data[pos - 1].as_f64();
    let s2 = data[pos + 1].as_f64();
    let denominator = 2.0 * s1 - s2 - s0;

    if denominator == 0.0 {
        return pos as f64;
    }

    pos as f64 + 0.5 * (s2 - s0) / denominator
}
