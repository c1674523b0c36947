//! Tempo estimation via spectral flux onset detection
//!
//! Computes an onset-strength envelope from frame-to-frame spectral change,
//! then reads the beat period out of the envelope's autocorrelation over a
//! plausible tempo range.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Analysis window length in samples (~46ms at 44.1kHz)
const FRAME_SIZE: usize = 2048;
/// Hop between windows in samples (~12ms at 44.1kHz)
const HOP_SIZE: usize = 512;
/// Tempo range scanned for periodicity
const MIN_BPM: f32 = 40.0;
const MAX_BPM: f32 = 240.0;
/// Reported when the signal carries no usable onsets
const FALLBACK_BPM: f32 = 120.0;
/// A local autocorrelation maximum this close to the global maximum counts
/// as a tie and the smallest lag among the tied peaks wins
const PEAK_TOLERANCE: f32 = 0.95;

const METHOD_AUTOCORRELATION: &str = "autocorrelation";
const METHOD_INTERVAL_HISTOGRAM: &str = "onset_interval_histogram";

/// Qualitative reading of the tempo stability metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoStability {
    Steady,
    Variable,
    HighlyVariable,
}

impl fmt::Display for TempoStability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempoStability::Steady => write!(f, "steady"),
            TempoStability::Variable => write!(f, "variable"),
            TempoStability::HighlyVariable => write!(f, "highly variable"),
        }
    }
}

/// One tempo hypothesis with its own confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoCandidate {
    pub bpm: f32,
    pub confidence: f32,
    pub method: String,
}

/// Tempo estimate for one waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoResult {
    /// Estimated tempo in beats per minute
    pub bpm: f32,
    /// Contrast of the winning periodicity peak over the autocorrelation
    /// baseline (0-1); a flat autocorrelation reads near 0
    pub confidence: f32,
    /// Name of the method that produced `bpm`
    pub method: String,
    /// Beat times in seconds, aligned to the onset envelope
    pub beat_positions: Vec<f64>,
    /// Spread of inter-beat intervals around the estimated period
    /// (coefficient of variation); None when too few beats were found
    pub stability: Option<f32>,
    /// Ranked hypotheses, the chosen estimate first
    pub candidate_estimates: Vec<TempoCandidate>,
}

impl TempoResult {
    /// Bucket the stability metric for display
    pub fn stability_rating(&self) -> Option<TempoStability> {
        self.stability.map(|value| {
            if value < 0.2 {
                TempoStability::Steady
            } else if value < 0.4 {
                TempoStability::Variable
            } else {
                TempoStability::HighlyVariable
            }
        })
    }

    /// Defined low-confidence fallback for input with no usable onsets
    fn insufficient() -> Self {
        Self {
            bpm: FALLBACK_BPM,
            confidence: 0.0,
            method: METHOD_AUTOCORRELATION.to_string(),
            beat_positions: Vec::new(),
            stability: None,
            candidate_estimates: Vec::new(),
        }
    }
}

/// Tempo analyzer over mono waveforms
pub struct TempoAnalyzer {
    sample_rate: u32,
    frame_size: usize,
    hop_size: usize,
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
}

impl TempoAnalyzer {
    /// Create a new tempo analyzer for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let frame_size = FRAME_SIZE;
        let hop_size = HOP_SIZE;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);

        // Pre-compute Hann window
        let window: Vec<f32> = (0..frame_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / frame_size as f32).cos()))
            .collect();

        Self {
            sample_rate,
            frame_size,
            hop_size,
            fft,
            window,
        }
    }

    /// Estimate the tempo of a mono waveform
    ///
    /// Always returns a result: input without usable onsets gets the
    /// low-confidence fallback instead of an error.
    pub fn analyze(&self, samples: &[f32]) -> TempoResult {
        let envelope = self.onset_envelope(samples);
        let frames_per_second = self.sample_rate as f32 / self.hop_size as f32;

        let min_lag = (frames_per_second * 60.0 / MAX_BPM) as usize;
        let max_lag = (frames_per_second * 60.0 / MIN_BPM) as usize;
        let upper = max_lag.min(envelope.len() / 2);

        let peak_level = envelope.iter().cloned().fold(0.0f32, f32::max);
        if peak_level <= 0.0 || min_lag == 0 || min_lag >= upper {
            return TempoResult::insufficient();
        }

        let correlations: Vec<(usize, f32)> = (min_lag..upper)
            .map(|lag| (lag, self.correlation_at_lag(&envelope, lag)))
            .collect();

        let best_correlation = correlations
            .iter()
            .map(|&(_, value)| value)
            .fold(0.0f32, f32::max);
        if best_correlation <= 0.0 {
            return TempoResult::insufficient();
        }

        let (chosen_lag, chosen_correlation) = Self::choose_peak(&correlations, best_correlation);
        let bpm = frames_per_second * 60.0 / chosen_lag as f32;

        let mean_correlation = correlations
            .iter()
            .map(|&(_, value)| value)
            .sum::<f32>()
            / correlations.len() as f32;
        let confidence = Self::peak_contrast(chosen_correlation, mean_correlation);

        let onsets = self.find_onset_peaks(&envelope);
        let beat_positions: Vec<f64> = self
            .beat_frames(&envelope, &onsets, chosen_lag)
            .into_iter()
            .map(|frame| frame as f64 * self.hop_size as f64 / self.sample_rate as f64)
            .collect();

        let period_s = 60.0 / bpm as f64;
        let stability = Self::interval_stability(&beat_positions, period_s);

        let mut candidate_estimates = vec![TempoCandidate {
            bpm,
            confidence,
            method: METHOD_AUTOCORRELATION.to_string(),
        }];
        candidate_estimates.extend(Self::secondary_peaks(
            &correlations,
            chosen_lag,
            mean_correlation,
            frames_per_second,
        ));
        if let Some(candidate) = Self::interval_histogram_estimate(&onsets, frames_per_second) {
            candidate_estimates.push(candidate);
        }
        // Chosen estimate stays first; the rest rank by confidence
        candidate_estimates[1..].sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            bpm,
            confidence,
            beats = beat_positions.len(),
            "tempo estimate selected"
        );

        TempoResult {
            bpm,
            confidence,
            method: METHOD_AUTOCORRELATION.to_string(),
            beat_positions,
            stability,
            candidate_estimates,
        }
    }

    /// Spectral-flux onset detection function
    ///
    /// Measures the half-wave-rectified change in magnitude spectrum between
    /// consecutive frames; transients push the flux up. Normalized to a
    /// maximum of 1.
    fn onset_envelope(&self, samples: &[f32]) -> Vec<f32> {
        let mut envelope = Vec::new();
        let mut prev_spectrum: Option<Vec<f32>> = None;

        let mut frame_start = 0;
        while frame_start + self.frame_size <= samples.len() {
            let frame = &samples[frame_start..frame_start + self.frame_size];

            let mut buffer: Vec<Complex<f32>> = frame
                .iter()
                .zip(&self.window)
                .map(|(s, w)| Complex::new(s * w, 0.0))
                .collect();

            self.fft.process(&mut buffer);

            let spectrum: Vec<f32> = buffer[..self.frame_size / 2]
                .iter()
                .map(|c| c.norm())
                .collect();

            // Only count increases in magnitude - decreases don't indicate onsets
            if let Some(ref prev) = prev_spectrum {
                let flux: f32 = spectrum
                    .iter()
                    .zip(prev.iter())
                    .map(|(curr, prev)| (curr - prev).max(0.0))
                    .sum();
                envelope.push(flux);
            }

            prev_spectrum = Some(spectrum);
            frame_start += self.hop_size;
        }

        let max = envelope.iter().cloned().fold(0.0f32, f32::max);
        if max > 0.0 {
            for value in &mut envelope {
                *value /= max;
            }
        }

        envelope
    }

    /// Peaks in the onset envelope, with an adaptive threshold and minimum spacing
    fn find_onset_peaks(&self, envelope: &[f32]) -> Vec<usize> {
        if envelope.is_empty() {
            return Vec::new();
        }

        // Adaptive threshold: mean + 0.5 * std_dev
        let mean: f32 = envelope.iter().sum::<f32>() / envelope.len() as f32;
        let variance: f32 =
            envelope.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / envelope.len() as f32;
        let threshold = (mean + 0.5 * variance.sqrt()).max(0.1);

        // Minimum distance between peaks: 50ms
        let min_distance = ((self.sample_rate as f32 * 0.05) as usize / self.hop_size).max(1);

        let mut peaks = Vec::new();
        let mut last_peak: isize = -(min_distance as isize);

        for i in 1..envelope.len().saturating_sub(1) {
            if envelope[i] > threshold
                && envelope[i] > envelope[i - 1]
                && envelope[i] >= envelope[i + 1]
                && (i as isize - last_peak) >= min_distance as isize
            {
                peaks.push(i);
                last_peak = i as isize;
            }
        }

        peaks
    }

    /// Normalized correlation of the envelope with itself at a given lag
    fn correlation_at_lag(&self, envelope: &[f32], lag: usize) -> f32 {
        if lag == 0 || lag >= envelope.len() / 2 {
            return 0.0;
        }

        let mut correlation: f32 = 0.0;
        let mut norm_a: f32 = 0.0;
        let mut norm_b: f32 = 0.0;

        for i in 0..(envelope.len() - lag) {
            correlation += envelope[i] * envelope[i + lag];
            norm_a += envelope[i] * envelope[i];
            norm_b += envelope[i + lag] * envelope[i + lag];
        }

        let norm = (norm_a * norm_b).sqrt();
        if norm > 0.0 {
            correlation / norm
        } else {
            0.0
        }
    }

    /// Pick the winning autocorrelation peak
    ///
    /// Strongly periodic input scores near-identically at the beat period and
    /// its multiples. The smallest-lag local maximum within a fixed tolerance
    /// of the global maximum wins, which resolves those near-ties
    /// deterministically; a clearly stronger slow peak still wins outright.
    fn choose_peak(correlations: &[(usize, f32)], best_correlation: f32) -> (usize, f32) {
        let floor = best_correlation * PEAK_TOLERANCE;

        for i in 1..correlations.len().saturating_sub(1) {
            let (lag, value) = correlations[i];
            if value >= floor && value > correlations[i - 1].1 && value >= correlations[i + 1].1 {
                return (lag, value);
            }
        }

        // No interior local maximum cleared the bar; take the global maximum
        correlations
            .iter()
            .copied()
            .fold((0, 0.0f32), |best, (lag, value)| {
                if value > best.1 {
                    (lag, value)
                } else {
                    best
                }
            })
    }

    /// Contrast of a peak over the autocorrelation baseline, in [0, 1]
    fn peak_contrast(peak: f32, mean: f32) -> f32 {
        let headroom = 1.0 - mean;
        if headroom > f32::EPSILON {
            ((peak - mean) / headroom).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Other autocorrelation peaks worth reporting alongside the winner
    fn secondary_peaks(
        correlations: &[(usize, f32)],
        chosen_lag: usize,
        mean_correlation: f32,
        frames_per_second: f32,
    ) -> Vec<TempoCandidate> {
        let exclusion = (chosen_lag / 10).max(2);
        let mut peaks: Vec<(usize, f32)> = Vec::new();

        for i in 1..correlations.len().saturating_sub(1) {
            let (lag, value) = correlations[i];
            if lag.abs_diff(chosen_lag) <= exclusion {
                continue;
            }
            if value > correlations[i - 1].1 && value >= correlations[i + 1].1 {
                peaks.push((lag, value));
            }
        }

        peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        peaks
            .into_iter()
            .take(2)
            .map(|(lag, value)| TempoCandidate {
                bpm: frames_per_second * 60.0 / lag as f32,
                confidence: Self::peak_contrast(value, mean_correlation),
                method: METHOD_AUTOCORRELATION.to_string(),
            })
            .collect()
    }

    /// Lay a beat grid at the detected period and snap each point to nearby onsets
    fn beat_frames(&self, envelope: &[f32], onsets: &[usize], period: usize) -> Vec<usize> {
        if period == 0 || envelope.is_empty() {
            return Vec::new();
        }

        // Phase with the most onset energy under the grid
        let mut best_phase = 0;
        let mut best_energy = f32::MIN;
        for phase in 0..period.min(envelope.len()) {
            let energy: f32 = (phase..envelope.len())
                .step_by(period)
                .map(|i| envelope[i])
                .sum();
            if energy > best_energy {
                best_energy = energy;
                best_phase = phase;
            }
        }

        let tolerance = (period / 6).max(1);
        let mut beats = Vec::new();
        let mut expected = best_phase;

        while expected < envelope.len() {
            let snapped = onsets
                .iter()
                .copied()
                .min_by_key(|onset| onset.abs_diff(expected))
                .filter(|onset| onset.abs_diff(expected) <= tolerance);

            let beat = snapped.unwrap_or(expected);
            if beats.last().map_or(true, |&last| beat > last) {
                beats.push(beat);
            }
            // Re-anchor on the snapped position so timing drift cannot accumulate
            expected = beat + period;
        }

        beats
    }

    /// Spread of inter-beat intervals around the estimated period
    fn interval_stability(beat_positions: &[f64], period_s: f64) -> Option<f32> {
        if beat_positions.len() < 4 || period_s <= 0.0 {
            return None;
        }

        let intervals: Vec<f64> = beat_positions.windows(2).map(|w| w[1] - w[0]).collect();
        let variance = intervals
            .iter()
            .map(|interval| (interval - period_s).powi(2))
            .sum::<f64>()
            / intervals.len() as f64;

        Some((variance.sqrt() / period_s) as f32)
    }

    /// Independent estimate from the spacing of detected onsets
    ///
    /// Builds a histogram of inter-onset intervals quantized to 10ms and
    /// reads the most common interval as a beat period.
    fn interval_histogram_estimate(
        onsets: &[usize],
        frames_per_second: f32,
    ) -> Option<TempoCandidate> {
        let min_interval = 60.0 / MAX_BPM;
        let max_interval = 60.0 / MIN_BPM;

        let mut intervals: Vec<f32> = Vec::new();
        for pair in onsets.windows(2) {
            let interval = (pair[1] - pair[0]) as f32 / frames_per_second;
            if interval >= min_interval && interval <= max_interval {
                intervals.push(interval);
            }
        }

        if intervals.len() < 4 {
            return None;
        }

        let mut histogram = [0u32; 151];
        for &interval in &intervals {
            let index = ((interval * 100.0).round() as usize).min(histogram.len() - 1);
            histogram[index] += 1;
        }

        let (peak_index, &peak_count) = histogram
            .iter()
            .enumerate()
            .max_by_key(|(_, &count)| count)?;

        let peak_interval = peak_index as f32 / 100.0;
        if peak_interval <= 0.0 {
            return None;
        }

        Some(TempoCandidate {
            bpm: 60.0 / peak_interval,
            confidence: (peak_count as f32 / intervals.len() as f32).clamp(0.0, 1.0),
            method: METHOD_INTERVAL_HISTOGRAM.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44100;

    /// Short decaying click on every beat at the given tempo
    fn click_train(bpm: f32, seconds: f64) -> Vec<f32> {
        let len = (seconds * RATE as f64) as usize;
        let mut samples = vec![0.0f32; len];
        let beat_samples = (60.0 / bpm * RATE as f32) as usize;

        let mut position = 0;
        while position < len {
            let width = 64.min(len - position);
            for i in 0..width {
                samples[position + i] = 0.9 * (1.0 - i as f32 / 64.0);
            }
            position += beat_samples;
        }
        samples
    }

    #[test]
    fn test_click_train_120_bpm() {
        let analyzer = TempoAnalyzer::new(RATE);
        let result = analyzer.analyze(&click_train(120.0, 10.0));

        assert!((result.bpm - 120.0).abs() <= 2.0, "got {} BPM", result.bpm);
        assert!(result.confidence > 0.5, "confidence {}", result.confidence);
        assert_eq!(result.method, "autocorrelation");
    }

    #[test]
    fn test_click_train_60_bpm() {
        let analyzer = TempoAnalyzer::new(RATE);
        let result = analyzer.analyze(&click_train(60.0, 15.0));
        assert!((result.bpm - 60.0).abs() <= 2.0, "got {} BPM", result.bpm);
    }

    #[test]
    fn test_beats_follow_the_period() {
        let analyzer = TempoAnalyzer::new(RATE);
        let result = analyzer.analyze(&click_train(120.0, 10.0));

        assert!(result.beat_positions.len() >= 16);
        for pair in result.beat_positions.windows(2) {
            let interval = pair[1] - pair[0];
            assert!((0.45..=0.55).contains(&interval), "interval {}", interval);
        }
    }

    #[test]
    fn test_steady_train_reads_as_steady() {
        let analyzer = TempoAnalyzer::new(RATE);
        let result = analyzer.analyze(&click_train(120.0, 10.0));

        let stability = result.stability.expect("enough beats for a stability reading");
        assert!(stability < 0.2, "stability {}", stability);
        assert_eq!(result.stability_rating(), Some(TempoStability::Steady));
    }

    #[test]
    fn test_silence_yields_low_confidence_fallback() {
        let analyzer = TempoAnalyzer::new(RATE);
        let result = analyzer.analyze(&vec![0.0f32; RATE as usize * 5]);

        assert_eq!(result.bpm, 120.0);
        assert_eq!(result.confidence, 0.0);
        assert!(result.beat_positions.is_empty());
        assert!(result.stability.is_none());
        assert!(result.candidate_estimates.is_empty());
        assert_eq!(result.stability_rating(), None);
    }

    #[test]
    fn test_determinism() {
        let analyzer = TempoAnalyzer::new(RATE);
        let samples = click_train(128.0, 8.0);
        assert_eq!(analyzer.analyze(&samples), analyzer.analyze(&samples));
    }

    #[test]
    fn test_confidence_bounds() {
        let analyzer = TempoAnalyzer::new(RATE);
        let steady_tone: Vec<f32> = (0..RATE as usize * 4)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / RATE as f32).sin() * 0.5)
            .collect();

        for samples in [
            click_train(120.0, 6.0),
            vec![0.0f32; RATE as usize * 2],
            steady_tone,
        ] {
            let result = analyzer.analyze(&samples);
            assert!((0.0..=1.0).contains(&result.confidence));
            for candidate in &result.candidate_estimates {
                assert!((0.0..=1.0).contains(&candidate.confidence));
                assert!(candidate.bpm > 0.0);
            }
        }
    }

    #[test]
    fn test_candidates_lead_with_the_chosen_estimate() {
        let analyzer = TempoAnalyzer::new(RATE);
        let result = analyzer.analyze(&click_train(120.0, 10.0));

        assert!(!result.candidate_estimates.is_empty());
        assert_eq!(result.candidate_estimates[0].bpm, result.bpm);
        assert_eq!(result.candidate_estimates[0].method, result.method);
        for pair in result.candidate_estimates[1..].windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert!(result
            .candidate_estimates
            .iter()
            .any(|candidate| candidate.method == "onset_interval_histogram"));
    }
}
