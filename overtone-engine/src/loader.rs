//! Audio decoding and resampling
//!
//! Turns a file on disk into a mono waveform at the fixed analysis rate.
//! Decoding goes through Symphonia; rate conversion goes through rubato's
//! FFT resampler.

use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed sample rate every waveform is brought to before analysis
pub const ANALYSIS_SAMPLE_RATE: u32 = 44_100;

/// Extensions the engine can decode; the collaborator echoes this list once
/// at startup
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];

/// Errors that can occur while loading a waveform
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("file not found")]
    FileNotFound,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no audio track found in file")]
    NoAudioTrack,
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("resample error: {0}")]
    Resample(String),
}

/// A decoded mono waveform at the analysis rate
#[derive(Debug, Clone)]
pub struct Waveform {
    /// Mono samples normalized to [-1, 1]
    pub samples: Vec<f32>,
    /// Rate the samples are at (the analysis rate)
    pub sample_rate: u32,
    /// Rate of the source file before resampling
    pub source_sample_rate: u32,
    /// Channel count of the source file before downmixing
    pub source_channels: u16,
}

impl Waveform {
    /// Duration in seconds at the analysis rate
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Audio file loader using Symphonia
#[derive(Debug, Clone)]
pub struct WaveformLoader {
    target_sample_rate: u32,
}

impl Default for WaveformLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveformLoader {
    /// Create a loader targeting the fixed analysis rate
    pub fn new() -> Self {
        Self {
            target_sample_rate: ANALYSIS_SAMPLE_RATE,
        }
    }

    /// Load a file, downmix to mono, and resample to the analysis rate
    pub fn load(&self, path: &Path) -> Result<Waveform, LoadError> {
        // Catch missing paths up front so they don't surface as opaque IO errors
        if !path.exists() {
            return Err(LoadError::FileNotFound);
        }

        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create hint from file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                e @ SymphoniaError::Unsupported(_) => LoadError::UnsupportedFormat(e.to_string()),
                e => LoadError::Decode(e.to_string()),
            })?;

        let mut format = probed.format;

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let source_sample_rate = codec_params.sample_rate.unwrap_or(ANALYSIS_SAMPLE_RATE);
        let mut source_channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                e @ SymphoniaError::Unsupported(_) => LoadError::UnsupportedFormat(e.to_string()),
                e => LoadError::Decode(e.to_string()),
            })?;

        // Decode all packets, averaging channels down to mono as we go
        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(_) => break,
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    warn!("skipping malformed packet: {e}");
                    continue;
                }
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            if channels == 0 {
                continue;
            }
            if source_channels == 0 {
                source_channels = channels as u16;
            }

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            for frame in sample_buf.samples().chunks_exact(channels) {
                samples.push(frame.iter().sum::<f32>() / channels as f32);
            }
        }

        debug!(
            samples = samples.len(),
            source_sample_rate, source_channels, "decoded audio stream"
        );

        let samples = if source_sample_rate != self.target_sample_rate && !samples.is_empty() {
            self.resample(&samples, source_sample_rate)?
        } else {
            samples
        };

        Ok(Waveform {
            samples,
            sample_rate: self.target_sample_rate,
            source_sample_rate,
            source_channels,
        })
    }

    /// Resample a mono waveform to the analysis rate
    fn resample(&self, samples: &[f32], source_rate: u32) -> Result<Vec<f32>, LoadError> {
        use rubato::{FftFixedInOut, Resampler};

        let mut resampler = FftFixedInOut::<f32>::new(
            source_rate as usize,
            self.target_sample_rate as usize,
            1024,
            1,
        )
        .map_err(|e| LoadError::Resample(e.to_string()))?;

        // Process in full chunks
        let chunk_size = resampler.input_frames_next();
        let mut output: Vec<f32> = Vec::new();

        let mut pos = 0;
        while pos + chunk_size <= samples.len() {
            let mut resampled = resampler
                .process(&[&samples[pos..pos + chunk_size]], None)
                .map_err(|e| LoadError::Resample(e.to_string()))?;
            output.append(&mut resampled[0]);
            pos += chunk_size;
        }

        // Flush the tail through a zero-padded final chunk, keeping only the
        // output that corresponds to real input
        if pos < samples.len() {
            let remaining = samples.len() - pos;
            let mut padded = samples[pos..].to_vec();
            padded.resize(chunk_size, 0.0);

            if let Ok(resampled) = resampler.process(&[padded.as_slice()], None) {
                let keep = (remaining * self.target_sample_rate as usize) / source_rate as usize;
                output.extend(&resampled[0][..keep.min(resampled[0].len())]);
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("overtone_loader_{name}"))
    }

    fn wav_spec(channels: u16, sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    fn sine(rate: u32, freq: f32, seconds: f64) -> Vec<f32> {
        (0..(seconds * rate as f64) as usize)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_load_mono_wav() {
        let path = temp_path("mono.wav");
        let samples = sine(44100, 440.0, 1.0);
        let mut writer = hound::WavWriter::create(&path, wav_spec(1, 44100)).unwrap();
        for &s in &samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let waveform = WaveformLoader::new().load(&path).unwrap();
        assert_eq!(waveform.sample_rate, ANALYSIS_SAMPLE_RATE);
        assert_eq!(waveform.source_sample_rate, 44100);
        assert_eq!(waveform.source_channels, 1);
        assert_eq!(waveform.samples.len(), samples.len());
        assert!((waveform.duration_secs() - 1.0).abs() < 1e-6);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_stereo_downmix_averages_channels() {
        let path = temp_path("stereo.wav");
        let samples = sine(44100, 220.0, 0.5);
        let mut writer = hound::WavWriter::create(&path, wav_spec(2, 44100)).unwrap();
        for &s in &samples {
            let left = (s * i16::MAX as f32) as i16;
            // Right channel mirrors left, so the average must cancel to zero
            writer.write_sample(left).unwrap();
            writer.write_sample(-left).unwrap();
        }
        writer.finalize().unwrap();

        let waveform = WaveformLoader::new().load(&path).unwrap();
        assert_eq!(waveform.source_channels, 2);
        assert_eq!(waveform.samples.len(), samples.len());
        let peak = waveform.samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak < 1e-4, "peak {peak}");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_low_rate_input_is_resampled() {
        let path = temp_path("22050.wav");
        let samples = sine(22050, 440.0, 1.0);
        let mut writer = hound::WavWriter::create(&path, wav_spec(1, 22050)).unwrap();
        for &s in &samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let waveform = WaveformLoader::new().load(&path).unwrap();
        assert_eq!(waveform.sample_rate, ANALYSIS_SAMPLE_RATE);
        assert_eq!(waveform.source_sample_rate, 22050);
        let expected = ANALYSIS_SAMPLE_RATE as i64;
        assert!((waveform.samples.len() as i64 - expected).abs() < 2048);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file() {
        let error = WaveformLoader::new()
            .load(Path::new("/nonexistent/overtone/missing.wav"))
            .unwrap_err();
        assert!(matches!(error, LoadError::FileNotFound));
    }

    #[test]
    fn test_unrecognizable_data() {
        let path = temp_path("garbage.xyz");
        std::fs::write(&path, vec![0x55u8; 4096]).unwrap();

        let error = WaveformLoader::new().load(&path).unwrap_err();
        assert!(matches!(error, LoadError::UnsupportedFormat(_)), "{error:?}");

        let _ = std::fs::remove_file(&path);
    }
}
