//! Silence segment detection
//!
//! Scans per-sample amplitude against a dB threshold and reports every
//! contiguous quiet stretch that lasts at least a minimum duration.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A contiguous stretch of near-silent audio, in seconds from track start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilenceSegment {
    /// Start of the segment
    pub start_s: f64,
    /// End of the segment (exclusive)
    pub end_s: f64,
    /// Length of the segment (`end_s - start_s`)
    pub duration_s: f64,
}

/// All silence found in a waveform, in chronological order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SilenceResult {
    /// Detected segments, chronological and non-overlapping
    pub segments: Vec<SilenceSegment>,
    /// Number of detected segments
    pub segment_count: usize,
    /// Sum of all segment durations
    pub total_silence_s: f64,
}

impl SilenceResult {
    /// Share of a track spent in silence, as a percentage of its duration
    pub fn percent_of(&self, duration_s: f64) -> f64 {
        if duration_s > 0.0 {
            self.total_silence_s / duration_s * 100.0
        } else {
            0.0
        }
    }
}

/// Amplitude-threshold silence scanner
pub struct SilenceScanner {
    threshold_db: f32,
    min_duration_s: f64,
}

impl SilenceScanner {
    /// Create a scanner for the given threshold (dBFS) and minimum duration (seconds)
    pub fn new(threshold_db: f32, min_duration_s: f64) -> Self {
        Self {
            threshold_db,
            min_duration_s,
        }
    }

    /// Scan a mono waveform and report every silent run of at least the minimum duration
    ///
    /// A single forward pass run-length-encodes samples whose absolute amplitude
    /// stays below the linear threshold. A quiet run still open at the end of the
    /// waveform is closed there and filtered like any interior run.
    pub fn scan(&self, samples: &[f32], sample_rate: u32) -> SilenceResult {
        let threshold = 10.0f32.powf(self.threshold_db / 20.0);
        // Round up so every reported segment really lasts the minimum duration
        let min_samples = (self.min_duration_s * sample_rate as f64).ceil() as usize;

        let mut segments = Vec::new();
        let mut run_start: Option<usize> = None;

        for (i, sample) in samples.iter().enumerate() {
            if sample.abs() < threshold {
                if run_start.is_none() {
                    run_start = Some(i);
                }
            } else if let Some(start) = run_start.take() {
                if i - start >= min_samples {
                    segments.push(Self::segment(start, i, sample_rate));
                }
            }
        }

        if let Some(start) = run_start {
            if samples.len() - start >= min_samples {
                segments.push(Self::segment(start, samples.len(), sample_rate));
            }
        }

        let total_silence_s = segments.iter().map(|s| s.duration_s).sum();

        debug!(
            segments = segments.len(),
            total_silence_s, "silence scan complete"
        );

        SilenceResult {
            segment_count: segments.len(),
            segments,
            total_silence_s,
        }
    }

    fn segment(start: usize, end: usize, sample_rate: u32) -> SilenceSegment {
        let rate = sample_rate as f64;
        SilenceSegment {
            start_s: start as f64 / rate,
            end_s: end as f64 / rate,
            duration_s: (end - start) as f64 / rate,
        }
    }
}
