//! Overtone analysis engine: decoding, resampling, and orchestration
//!
//! `MusicAnalyzer` is the front door: construct it with an `AnalysisConfig`,
//! point it at a file, and get back one `AnalysisResult` or a tagged
//! `AnalysisError`.

pub mod analyzer;
pub mod loader;
pub mod result;

pub use analyzer::{AnalysisProgress, CancelToken, MusicAnalyzer};
pub use loader::{LoadError, Waveform, WaveformLoader, ANALYSIS_SAMPLE_RATE, SUPPORTED_EXTENSIONS};
pub use result::{AnalysisConfig, AnalysisError, AnalysisResult, AudioInfo};

pub use overtone_analysis::{
    KeyResult, KeyStability, Mode, PitchClass, SilenceResult, SilenceSegment, TempoCandidate,
    TempoResult, TempoStability,
};
