//! Musical key detection via chromagram analysis
//!
//! Folds the magnitude spectrum into a 12-bin pitch-class profile and scores
//! it against Krumhansl-Kessler key templates at every rotation, major and
//! minor.

use crate::pitch::{Mode, PitchClass};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Krumhansl-Kessler major key profile, C-rooted
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor key profile, C-rooted
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.6, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const A4_FREQ: f32 = 440.0;
const FFT_SIZE: usize = 4096;
const HOP_SIZE: usize = 2048;
/// Length of each voting window when measuring key stability
const WINDOW_SECS: f64 = 10.0;

const METHOD_CHROMAGRAM: &str = "chromagram_template_matching";

/// Qualitative reading of the key stability metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStability {
    Consistent,
    Moderate,
    Variable,
}

impl fmt::Display for KeyStability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStability::Consistent => write!(f, "consistent"),
            KeyStability::Moderate => write!(f, "moderate"),
            KeyStability::Variable => write!(f, "variable"),
        }
    }
}

/// Key estimate for one waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyResult {
    /// Tonic pitch class of the best-matching key
    pub tonic: PitchClass,
    pub mode: Mode,
    /// Best template match score over the unit-sum chroma (0-1); zero-energy
    /// input reads as 0
    pub confidence: f32,
    /// Name of the method that produced the estimate
    pub method: String,
    /// Whole-track pitch-class profile, normalized to unit sum; all zeros
    /// when the track carries no energy
    pub chroma_profile: [f32; 12],
    /// Fraction of analysis windows agreeing with the whole-track key;
    /// None when fewer than two windows carried key evidence
    pub stability: Option<f32>,
    /// True when the windowed estimates disagree enough to suggest a
    /// mid-track key change
    pub key_changes_detected: bool,
}

impl KeyResult {
    /// Bucket the stability metric for display
    pub fn stability_rating(&self) -> Option<KeyStability> {
        self.stability.map(|value| {
            if value > 0.8 {
                KeyStability::Consistent
            } else if value > 0.6 {
                KeyStability::Moderate
            } else {
                KeyStability::Variable
            }
        })
    }
}

/// Key analyzer over mono waveforms
pub struct KeyAnalyzer {
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    /// Pitch class and weight per FFT bin, None outside the mapped range
    bin_pitch_classes: Vec<Option<(usize, f32)>>,
    major_template: [f32; 12],
    minor_template: [f32; 12],
}

impl KeyAnalyzer {
    /// Create a new key analyzer for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let fft_size = FFT_SIZE;
        let hop_size = HOP_SIZE;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        // Map bins in the musically useful range onto pitch classes.
        // Bins falling between semitones and high-frequency content both
        // carry less key evidence, so they get down-weighted.
        let mut bin_pitch_classes: Vec<Option<(usize, f32)>> = vec![None; fft_size / 2];
        for (bin, entry) in bin_pitch_classes.iter_mut().enumerate().skip(1) {
            let freq = bin as f32 * sample_rate as f32 / fft_size as f32;
            if !(55.0..=4000.0).contains(&freq) {
                continue;
            }
            let midi = 69.0 + 12.0 * (freq / A4_FREQ).log2();
            let nearest = midi.round();
            let detune = (midi - nearest).abs();
            let weight = (1.0 - detune.min(0.5) * 2.0) * (500.0 / freq.max(500.0)).sqrt();
            if weight > 0.0 {
                *entry = Some((nearest as usize % 12, weight));
            }
        }

        Self {
            sample_rate,
            fft_size,
            hop_size,
            fft,
            window,
            fft_buffer: Vec::with_capacity(fft_size),
            bin_pitch_classes,
            major_template: unit_peak(MAJOR_PROFILE),
            minor_template: unit_peak(MINOR_PROFILE),
        }
    }

    /// Estimate the key of a mono waveform
    ///
    /// Always returns a result: zero-energy input reads as C major with zero
    /// confidence.
    pub fn analyze(&mut self, samples: &[f32]) -> KeyResult {
        let raw = self.chromagram(samples);
        let total: f32 = raw.iter().sum();
        let chroma_profile = if total > 0.0 {
            raw.map(|value| value / total)
        } else {
            [0.0; 12]
        };

        let (tonic, mode, confidence) = self.match_templates(&chroma_profile);
        let (stability, key_changes_detected) = self.windowed_stability(samples, tonic, mode);

        debug!(%tonic, %mode, confidence, "key estimate selected");

        KeyResult {
            tonic,
            mode,
            confidence,
            method: METHOD_CHROMAGRAM.to_string(),
            chroma_profile,
            stability,
            key_changes_detected,
        }
    }

    /// Score a chroma vector against all 24 rotated key templates
    ///
    /// Confidence is the winning dot product over the unit-sum chroma, in
    /// [0, 1]. Ties resolve to the lower pitch class, major before minor.
    pub fn match_templates(&self, chroma: &[f32; 12]) -> (PitchClass, Mode, f32) {
        let total: f32 = chroma.iter().sum();
        if total <= 0.0 {
            return (PitchClass::C, Mode::Major, 0.0);
        }

        let normalized = chroma.map(|value| value / total);

        let mut best = (PitchClass::C, Mode::Major);
        let mut best_score = f32::NEG_INFINITY;

        for root in 0..12 {
            let rotated = rotate_chroma(&normalized, root);
            for (mode, template) in [
                (Mode::Major, &self.major_template),
                (Mode::Minor, &self.minor_template),
            ] {
                let score: f32 = rotated
                    .iter()
                    .zip(template.iter())
                    .map(|(c, t)| c * t)
                    .sum();
                if score > best_score {
                    best_score = score;
                    best = (PitchClass::from_index(root), mode);
                }
            }
        }

        (best.0, best.1, best_score.clamp(0.0, 1.0))
    }

    /// Average pitch-class profile over all analysis frames
    fn chromagram(&mut self, samples: &[f32]) -> [f32; 12] {
        let mut chroma = [0.0f32; 12];
        let mut frames = 0usize;

        let mut frame_start = 0;
        while frame_start + self.fft_size <= samples.len() {
            let frame = &samples[frame_start..frame_start + self.fft_size];

            self.fft_buffer.clear();
            self.fft_buffer.extend(
                frame
                    .iter()
                    .zip(&self.window)
                    .map(|(s, w)| Complex::new(s * w, 0.0)),
            );
            self.fft.process(&mut self.fft_buffer);

            for (bin, mapping) in self.bin_pitch_classes.iter().enumerate() {
                if let Some((pitch_class, weight)) = mapping {
                    chroma[*pitch_class] += self.fft_buffer[bin].norm_sqr() * weight;
                }
            }

            frames += 1;
            frame_start += self.hop_size;
        }

        if frames > 0 {
            for value in &mut chroma {
                *value /= frames as f32;
            }
        }

        chroma
    }

    /// Agreement between per-window key estimates and the whole-track estimate
    fn windowed_stability(
        &mut self,
        samples: &[f32],
        tonic: PitchClass,
        mode: Mode,
    ) -> (Option<f32>, bool) {
        let window_samples = (WINDOW_SECS * self.sample_rate as f64) as usize;
        if window_samples == 0 {
            return (None, false);
        }

        let mut votes = 0usize;
        let mut agreements = 0usize;

        let mut start = 0;
        while start + window_samples <= samples.len() {
            let chroma = self.chromagram(&samples[start..start + window_samples]);
            // Near-silent windows carry no key evidence
            if chroma.iter().sum::<f32>() >= 1e-6 {
                let (window_tonic, window_mode, _) = self.match_templates(&chroma);
                votes += 1;
                if window_tonic == tonic && window_mode == mode {
                    agreements += 1;
                }
            }
            start += window_samples;
        }

        if votes < 2 {
            return (None, false);
        }

        let stability = agreements as f32 / votes as f32;
        (Some(stability), stability < 0.8)
    }
}

/// Scale a profile so its strongest entry is 1
fn unit_peak(profile: [f32; 12]) -> [f32; 12] {
    let peak = profile.iter().cloned().fold(0.0f32, f32::max);
    profile.map(|value| value / peak)
}

fn rotate_chroma(chroma: &[f32; 12], root: usize) -> [f32; 12] {
    let mut rotated = [0.0f32; 12];
    for (i, value) in rotated.iter_mut().enumerate() {
        *value = chroma[(i + root) % 12];
    }
    rotated
}
