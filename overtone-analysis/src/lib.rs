//! Audio feature extraction: tempo, key, and silence analysis
//!
//! Pure DSP over mono f32 waveforms. Nothing here touches the filesystem or
//! decodes audio; estimators are deterministic functions of the samples they
//! are given.

pub mod key;
pub mod pitch;
pub mod silence;
pub mod tempo;

pub use key::{KeyAnalyzer, KeyResult, KeyStability};
pub use pitch::{Mode, PitchClass};
pub use silence::{SilenceResult, SilenceScanner, SilenceSegment};
pub use tempo::{TempoAnalyzer, TempoCandidate, TempoResult, TempoStability};
