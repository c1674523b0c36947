//! Overtone - audio analysis CLI
//!
//! Runs the analysis pipeline over one or more audio files and prints
//! a report (or JSON) per file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use overtone_engine::{AnalysisConfig, AnalysisResult, MusicAnalyzer, SUPPORTED_EXTENSIONS};

#[derive(Parser, Debug)]
#[command(name = "overtone", version, about = "Tempo, key, and silence analysis for audio files")]
struct Args {
    /// Audio files to analyze
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Silence threshold in dBFS, -60 to -20
    #[arg(long, default_value_t = -40.0, allow_negative_numbers = true)]
    silence_threshold_db: f32,

    /// Minimum silence duration in seconds, 0.1 to 2.0
    #[arg(long, default_value_t = 0.5)]
    min_silence_duration: f64,

    /// Emit one pretty-printed JSON document per file instead of a report
    #[arg(long)]
    json: bool,

    /// Include beat positions in the report
    #[arg(long)]
    beats: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overtone=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<usize> {
    let args = Args::parse();
    let config = build_config(&args)?;

    info!("supported formats: {}", SUPPORTED_EXTENSIONS.join(", "));

    let analyzer = MusicAnalyzer::new(config);
    let mut failures = 0;

    for path in &args.paths {
        match analyzer.analyze(path) {
            Ok(result) => {
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    print_report(&result, args.beats);
                }
            }
            Err(error) => {
                failures += 1;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&error)?);
                } else {
                    eprintln!("{}: {error}", path.display());
                }
            }
        }
    }

    Ok(failures)
}

/// Validate argument ranges and build the engine configuration.
fn build_config(args: &Args) -> Result<AnalysisConfig> {
    if !(-60.0..=-20.0).contains(&args.silence_threshold_db) {
        bail!(
            "silence threshold must be between -60 and -20 dBFS, got {}",
            args.silence_threshold_db
        );
    }
    if !(0.1..=2.0).contains(&args.min_silence_duration) {
        bail!(
            "minimum silence duration must be between 0.1 and 2.0 seconds, got {}",
            args.min_silence_duration
        );
    }
    Ok(AnalysisConfig {
        silence_threshold_db: args.silence_threshold_db,
        min_silence_duration_s: args.min_silence_duration,
    })
}

fn print_report(result: &AnalysisResult, show_beats: bool) {
    println!("{}", result.file_path.display());
    println!(
        "  duration: {:.1}s ({} Hz, {} channel source)",
        result.duration_secs,
        result.audio_info.source_sample_rate,
        result.audio_info.source_channels,
    );

    print!(
        "  tempo: {:.1} BPM (confidence {:.2})",
        result.tempo.bpm, result.tempo.confidence
    );
    if let Some(rating) = result.tempo.stability_rating() {
        print!(", {rating}");
    }
    println!();

    print!(
        "  key: {} {} (confidence {:.2})",
        result.key.tonic, result.key.mode, result.key.confidence
    );
    if let Some(rating) = result.key.stability_rating() {
        print!(", {rating}");
    }
    if result.key.key_changes_detected {
        print!(", key change suspected");
    }
    println!();

    if result.silence.segments.is_empty() {
        println!("  silence: none");
    } else {
        println!(
            "  silence: {} segment(s), {:.1}s total ({:.1}% of track)",
            result.silence.segment_count,
            result.silence.total_silence_s,
            result.silence.percent_of(result.duration_secs),
        );
        for segment in &result.silence.segments {
            println!(
                "    {:>7.2}s - {:>7.2}s ({:.2}s)",
                segment.start_s, segment.end_s, segment.duration_s
            );
        }
    }

    if show_beats {
        let beats: Vec<String> = result
            .tempo
            .beat_positions
            .iter()
            .map(|b| format!("{b:.2}"))
            .collect();
        println!("  beats: {}", beats.join(" "));
    }
}
