//! Aggregate analysis results, run configuration, and the public error
//! taxonomy
//!
//! Field names here are the serialization contract; the collaborator
//! serializes these types verbatim.

use crate::loader::LoadError;
use overtone_analysis::{KeyResult, SilenceResult, TempoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tunable parameters for one analysis run
///
/// Echoed into the result so every report carries the settings that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Amplitude threshold below which a sample counts as silent, in dBFS
    pub silence_threshold_db: f32,
    /// Minimum length a quiet run must reach to count as silence, in seconds
    pub min_silence_duration_s: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            min_silence_duration_s: 0.5,
        }
    }
}

/// Properties of the decoded audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Rate the analysis ran at
    pub sample_rate: u32,
    /// Mono sample count at the analysis rate
    pub sample_count: usize,
    /// Rate of the source file before resampling
    pub source_sample_rate: u32,
    /// Channel count of the source file before downmixing
    pub source_channels: u16,
}

/// Everything the pipeline extracted from one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub audio_info: AudioInfo,
    /// The configuration this result was produced with
    pub config: AnalysisConfig,
    pub tempo: TempoResult,
    pub key: KeyResult,
    pub silence: SilenceResult,
}

/// Why an analysis run failed
///
/// Serializes as a tagged object:
/// `{"kind": ..., "message": ..., "file_path": ...}`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AnalysisError {
    #[error("file not found: {}", .file_path.display())]
    FileNotFound { file_path: PathBuf, message: String },
    #[error("unsupported format: {message} ({})", .file_path.display())]
    UnsupportedFormat { file_path: PathBuf, message: String },
    #[error("decode failed: {message} ({})", .file_path.display())]
    #[serde(rename = "DecodeError")]
    Decode { file_path: PathBuf, message: String },
    #[error("analysis failed: {message} ({})", .file_path.display())]
    #[serde(rename = "InternalAnalysisFailure")]
    Internal { file_path: PathBuf, message: String },
    #[error("analysis cancelled ({})", .file_path.display())]
    Cancelled { file_path: PathBuf, message: String },
}

impl AnalysisError {
    /// Map a loader failure onto the public taxonomy, attaching the path
    ///
    /// IO and missing-track failures collapse into the decode kind; the
    /// remaining loader variants map one to one.
    pub(crate) fn from_load(error: LoadError, path: &Path) -> Self {
        let file_path = path.to_path_buf();
        match error {
            LoadError::FileNotFound => Self::FileNotFound {
                file_path,
                message: "file not found".to_string(),
            },
            LoadError::UnsupportedFormat(message) => Self::UnsupportedFormat { file_path, message },
            other => Self::Decode {
                file_path,
                message: other.to_string(),
            },
        }
    }

    /// Path of the file the failure belongs to
    pub fn file_path(&self) -> &Path {
        match self {
            Self::FileNotFound { file_path, .. }
            | Self::UnsupportedFormat { file_path, .. }
            | Self::Decode { file_path, .. }
            | Self::Internal { file_path, .. }
            | Self::Cancelled { file_path, .. } => file_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overtone_analysis::{Mode, PitchClass};

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            file_path: PathBuf::from("/tmp/track.wav"),
            duration_secs: 1.5,
            audio_info: AudioInfo {
                sample_rate: 44100,
                sample_count: 66150,
                source_sample_rate: 48000,
                source_channels: 2,
            },
            config: AnalysisConfig::default(),
            tempo: TempoResult {
                bpm: 120.0,
                confidence: 0.8,
                method: "autocorrelation".to_string(),
                beat_positions: vec![0.5, 1.0],
                stability: Some(0.1),
                candidate_estimates: Vec::new(),
            },
            key: KeyResult {
                tonic: PitchClass::CSharp,
                mode: Mode::Minor,
                confidence: 0.4,
                method: "chromagram_template_matching".to_string(),
                chroma_profile: [0.0; 12],
                stability: None,
                key_changes_detected: false,
            },
            silence: SilenceResult {
                segments: Vec::new(),
                segment_count: 0,
                total_silence_s: 0.0,
            },
        }
    }

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.silence_threshold_db, -40.0);
        assert_eq!(config.min_silence_duration_s, 0.5);
    }

    #[test]
    fn test_result_serialization_contract() {
        let value = serde_json::to_value(sample_result()).unwrap();

        assert_eq!(value["file_path"], "/tmp/track.wav");
        assert_eq!(value["tempo"]["bpm"], 120.0);
        assert_eq!(value["tempo"]["method"], "autocorrelation");
        assert_eq!(value["key"]["tonic"], "C#");
        assert_eq!(value["key"]["mode"], "minor");
        assert_eq!(value["audio_info"]["source_channels"], 2);
        assert_eq!(value["config"]["silence_threshold_db"], -40.0);
        assert_eq!(value["silence"]["segment_count"], 0);
    }

    #[test]
    fn test_result_round_trips_through_json() {
        let result = sample_result();
        let json = serde_json::to_string(&result).unwrap();
        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_error_serialization_contract() {
        let error = AnalysisError::Decode {
            file_path: PathBuf::from("/tmp/x.mp3"),
            message: "bad frame".to_string(),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["kind"], "DecodeError");
        assert_eq!(value["message"], "bad frame");
        assert_eq!(value["file_path"], "/tmp/x.mp3");

        let internal = AnalysisError::Internal {
            file_path: PathBuf::from("/tmp/x.mp3"),
            message: "tempo estimator panicked".to_string(),
        };
        let value = serde_json::to_value(&internal).unwrap();
        assert_eq!(value["kind"], "InternalAnalysisFailure");
    }

    #[test]
    fn test_load_error_mapping() {
        let path = Path::new("/tmp/y.flac");

        let mapped = AnalysisError::from_load(LoadError::FileNotFound, path);
        assert!(matches!(mapped, AnalysisError::FileNotFound { .. }));
        assert_eq!(mapped.file_path(), path);

        let mapped = AnalysisError::from_load(LoadError::NoAudioTrack, path);
        assert!(matches!(mapped, AnalysisError::Decode { .. }));

        let mapped =
            AnalysisError::from_load(LoadError::UnsupportedFormat("xyz".to_string()), path);
        assert!(matches!(mapped, AnalysisError::UnsupportedFormat { .. }));
    }
}
