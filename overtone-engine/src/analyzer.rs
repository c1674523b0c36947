//! Analysis orchestration
//!
//! Loads a waveform once, fans the three estimators out over it in parallel,
//! and assembles a single aggregate result. Load failures abort the run
//! before any estimator starts; an estimator fault fails the whole run with
//! a structured error rather than producing partial results.

use crate::loader::{Waveform, WaveformLoader};
use crate::result::{AnalysisConfig, AnalysisError, AnalysisResult, AudioInfo};
use crossbeam_channel::{unbounded, Receiver, Sender};
use overtone_analysis::{
    KeyAnalyzer, KeyResult, SilenceResult, SilenceScanner, TempoAnalyzer, TempoResult,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Cooperative cancellation handle shared between a caller and a running
/// analysis
///
/// Checked at phase boundaries only; a phase that has started runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run stops at its next phase boundary
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Coarse progress events emitted by an asynchronous analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisProgress {
    Loading,
    Analyzing,
    Finished,
}

/// Runs the full feature-extraction pipeline on audio files
///
/// One analyzer carries one configuration; concurrent `analyze` calls do not
/// interfere with each other.
#[derive(Debug, Clone, Default)]
pub struct MusicAnalyzer {
    config: AnalysisConfig,
    loader: WaveformLoader,
    cancel: CancelToken,
}

impl MusicAnalyzer {
    /// Create an analyzer with the given configuration
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            loader: WaveformLoader::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Handle for cancelling runs started from this analyzer
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Analyze one file end to end
    ///
    /// Fails fast if the file cannot be loaded. Estimator faults surface as
    /// `AnalysisError::Internal`; nothing crosses this boundary as a panic.
    pub fn analyze(&self, path: &Path) -> Result<AnalysisResult, AnalysisError> {
        self.run(path, None)
    }

    /// Analyze on a worker thread, reporting coarse progress on a channel
    ///
    /// The receiver sees `Loading`, `Analyzing`, then `Finished` on success;
    /// the result itself comes from joining the returned handle. Cancel via
    /// `cancel_token` to abandon a stale request.
    pub fn analyze_async(
        &self,
        path: PathBuf,
    ) -> (
        Receiver<AnalysisProgress>,
        JoinHandle<Result<AnalysisResult, AnalysisError>>,
    ) {
        let (tx, rx) = unbounded();
        let analyzer = self.clone();
        let handle = std::thread::spawn(move || analyzer.run(&path, Some(&tx)));
        (rx, handle)
    }

    fn run(
        &self,
        path: &Path,
        progress: Option<&Sender<AnalysisProgress>>,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.check_cancelled(path)?;
        emit(progress, AnalysisProgress::Loading);

        info!(path = %path.display(), "analyzing");
        let waveform = self
            .loader
            .load(path)
            .map_err(|error| AnalysisError::from_load(error, path))?;

        self.check_cancelled(path)?;
        emit(progress, AnalysisProgress::Analyzing);

        let (tempo, key, silence) = self.run_estimators(&waveform, path)?;

        self.check_cancelled(path)?;

        let result = AnalysisResult {
            file_path: path.to_path_buf(),
            duration_secs: waveform.duration_secs(),
            audio_info: AudioInfo {
                sample_rate: waveform.sample_rate,
                sample_count: waveform.samples.len(),
                source_sample_rate: waveform.source_sample_rate,
                source_channels: waveform.source_channels,
            },
            config: self.config,
            tempo,
            key,
            silence,
        };

        emit(progress, AnalysisProgress::Finished);
        Ok(result)
    }

    /// Run the three estimators in parallel over the shared waveform
    fn run_estimators(
        &self,
        waveform: &Waveform,
        path: &Path,
    ) -> Result<(TempoResult, KeyResult, SilenceResult), AnalysisError> {
        let samples = waveform.samples.as_slice();
        let sample_rate = waveform.sample_rate;
        let scanner = SilenceScanner::new(
            self.config.silence_threshold_db,
            self.config.min_silence_duration_s,
        );

        std::thread::scope(|scope| {
            let tempo = scope.spawn(move || TempoAnalyzer::new(sample_rate).analyze(samples));
            let key = scope.spawn(move || {
                let mut analyzer = KeyAnalyzer::new(sample_rate);
                analyzer.analyze(samples)
            });
            let silence = scope.spawn(move || scanner.scan(samples, sample_rate));

            let tempo = join_estimator(tempo.join(), "tempo", path);
            let key = join_estimator(key.join(), "key", path);
            let silence = join_estimator(silence.join(), "silence", path);

            Ok((tempo?, key?, silence?))
        })
    }

    fn check_cancelled(&self, path: &Path) -> Result<(), AnalysisError> {
        if self.cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled {
                file_path: path.to_path_buf(),
                message: "analysis cancelled".to_string(),
            });
        }
        Ok(())
    }
}

/// Convert an estimator thread panic into a structured whole-run failure
fn join_estimator<T>(
    joined: std::thread::Result<T>,
    stage: &'static str,
    path: &Path,
) -> Result<T, AnalysisError> {
    joined.map_err(|panic| {
        let reason = if let Some(text) = panic.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = panic.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic".to_string()
        };
        AnalysisError::Internal {
            file_path: path.to_path_buf(),
            message: format!("{stage} estimator panicked: {reason}"),
        }
    })
}

fn emit(progress: Option<&Sender<AnalysisProgress>>, event: AnalysisProgress) {
    if let Some(tx) = progress {
        // Receiver may already be gone; progress is best-effort
        let _ = tx.send(event);
    }
}
