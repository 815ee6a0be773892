use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::MelScale;
use crate::output::OutputMode;
use crate::CHUNK_SAMPLES;

const DEFAULT_MEL_MODEL: &str = "models/melspectrogram.onnx";
const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding_model.onnx";
const DEFAULT_VAD_MODEL: &str = "models/silero_vad.onnx";

#[derive(Parser, Debug, Default)]
#[command(
    name = "wakestream",
    version,
    about = "Streaming wake word detection over cascaded ONNX models"
)]
pub struct Args {
    /// Path to a wake word model (repeat for multiple keywords)
    #[arg(short = 'm', long = "model")]
    pub models: Vec<PathBuf>,

    /// Detection threshold, 0-1 (default 0.5)
    #[arg(short = 't', long)]
    pub threshold: Option<f32>,

    /// Activations required before a detection fires (default 4)
    #[arg(short = 'l', long = "trigger-level")]
    pub trigger_level: Option<i32>,

    /// Steps to hold a detector silent after a detection (default 20)
    #[arg(short = 'r', long = "refractory")]
    pub refractory: Option<i32>,

    /// 80 ms audio chunks per mel frame, 1-16 (default 4)
    #[arg(long = "step-frames")]
    pub step_frames: Option<usize>,

    /// Override the mel spectrogram model path
    #[arg(long = "melspectrogram-model")]
    pub melspectrogram_model: Option<PathBuf>,

    /// Override the speech embedding model path
    #[arg(long = "embedding-model")]
    pub embedding_model: Option<PathBuf>,

    /// Enable the VAD pre-filter at this threshold (0-1)
    #[arg(long = "vad-threshold")]
    pub vad_threshold: Option<f32>,

    /// Path to the VAD model
    #[arg(long = "vad-model")]
    pub vad_model: Option<PathBuf>,

    /// Enable RNNoise noise suppression on the audio ingress
    #[arg(long = "enable-noise-suppression")]
    pub enable_noise_suppression: bool,

    /// Print per-prediction probabilities to stderr
    #[arg(long)]
    pub debug: bool,

    /// Log errors only
    #[arg(long)]
    pub quiet: bool,

    /// Log at debug verbosity
    #[arg(long)]
    pub verbose: bool,

    /// Emit detections as JSON records
    #[arg(long)]
    pub json: bool,

    /// Prefix detections with a timestamp
    #[arg(long)]
    pub timestamp: bool,

    /// List keyword models in the models directory and exit
    #[arg(long = "list-models")]
    pub list_models: bool,

    /// Load options from a JSON configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

/// Options loadable from `--config`; command-line flags win over the file.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    models: Option<Vec<PathBuf>>,
    threshold: Option<f32>,
    trigger_level: Option<i32>,
    refractory_steps: Option<i32>,
    step_frames: Option<usize>,
    melspectrogram_model: Option<PathBuf>,
    embedding_model: Option<PathBuf>,
    vad_threshold: Option<f32>,
    vad_model: Option<PathBuf>,
    enable_noise_suppression: Option<bool>,
    mel_scale: Option<MelScale>,
}

/// Per-detector settings.
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    pub model_path: PathBuf,
    pub threshold: f32,
    pub trigger_level: i32,
    pub refractory_steps: i32,
    pub debug: bool,
}

/// Fully resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mel_model_path: PathBuf,
    pub embedding_model_path: PathBuf,
    pub wake_words: Vec<WakeWordConfig>,
    pub step_frames: usize,
    pub mel_scale: MelScale,
    pub enable_vad: bool,
    pub vad_threshold: f32,
    pub vad_model_path: PathBuf,
    pub enable_noise_suppression: bool,
    pub output_mode: OutputMode,
    pub show_timestamp: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_json::from_str::<FileConfig>(&text)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let models = if args.models.is_empty() {
            file.models.unwrap_or_default()
        } else {
            args.models
        };
        let threshold = args.threshold.or(file.threshold).unwrap_or(0.5);
        let trigger_level = args.trigger_level.or(file.trigger_level).unwrap_or(4);
        let refractory_steps = args.refractory.or(file.refractory_steps).unwrap_or(20);
        let step_frames = args.step_frames.or(file.step_frames).unwrap_or(4);

        let enable_vad = args.vad_threshold.is_some()
            || args.vad_model.is_some()
            || file.vad_threshold.is_some()
            || file.vad_model.is_some();

        let output_mode = if args.json {
            OutputMode::Json
        } else if args.quiet {
            OutputMode::Quiet
        } else if args.verbose {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        };

        let wake_words = models
            .iter()
            .map(|model_path| WakeWordConfig {
                model_path: model_path.clone(),
                threshold,
                trigger_level,
                refractory_steps,
                debug: args.debug,
            })
            .collect();

        let config = Self {
            mel_model_path: args
                .melspectrogram_model
                .or(file.melspectrogram_model)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MEL_MODEL)),
            embedding_model_path: args
                .embedding_model
                .or(file.embedding_model)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EMBEDDING_MODEL)),
            wake_words,
            step_frames,
            mel_scale: file.mel_scale.unwrap_or_default(),
            enable_vad,
            vad_threshold: args.vad_threshold.or(file.vad_threshold).unwrap_or(0.5),
            vad_model_path: args
                .vad_model
                .or(file.vad_model)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VAD_MODEL)),
            enable_noise_suppression: args.enable_noise_suppression
                || file.enable_noise_suppression.unwrap_or(false),
            output_mode,
            show_timestamp: args.timestamp,
        };

        config.validate()?;
        Ok(config)
    }

    /// Samples per mel-model invocation.
    pub fn frame_samples(&self) -> usize {
        self.step_frames * CHUNK_SAMPLES
    }

    fn validate(&self) -> Result<()> {
        if self.wake_words.is_empty() {
            bail!("no wake word models specified");
        }
        if !(1..=16).contains(&self.step_frames) {
            bail!("step-frames must be between 1 and 16");
        }
        for wake_word in &self.wake_words {
            if !(0.0..=1.0).contains(&wake_word.threshold) {
                bail!("threshold must be between 0 and 1");
            }
            if wake_word.trigger_level < 1 {
                bail!("trigger-level must be at least 1");
            }
            if wake_word.refractory_steps < 0 {
                bail!("refractory must be non-negative");
            }
            if !wake_word.model_path.exists() {
                bail!(
                    "wake word model not found: {}",
                    wake_word.model_path.display()
                );
            }
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            bail!("vad-threshold must be between 0 and 1");
        }
        if !self.mel_model_path.exists() {
            bail!(
                "mel spectrogram model not found: {}",
                self.mel_model_path.display()
            );
        }
        if !self.embedding_model_path.exists() {
            bail!(
                "embedding model not found: {}",
                self.embedding_model_path.display()
            );
        }
        if self.enable_vad && !self.vad_model_path.exists() {
            bail!("VAD model not found: {}", self.vad_model_path.display());
        }
        Ok(())
    }
}

/// Keyword models in a directory: every .onnx that is not one of the
/// shared pipeline models.
pub fn available_models(dir: &Path) -> Result<Vec<String>> {
    let reserved = ["melspectrogram", "embedding_model", "silero_vad"];
    let mut names = Vec::new();

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read models directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if !reserved.contains(&stem) {
                names.push(stem.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}
