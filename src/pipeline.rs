use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::channel::Handoff;
use crate::config::Config;
use crate::detector::DetectorStage;
use crate::embedding::EmbeddingStage;
use crate::mel::MelStage;
use crate::model::{EmbeddingModel, KeywordModel, MelModel};
use crate::output::EventSink;
use crate::pool::VectorPool;
use crate::preprocess::{NoiseSuppressor, Preprocessor};
use crate::simd;
use crate::vad::VoiceGate;
use crate::{MELS_PER_CHUNK, NUM_MELS};

const AUDIO_POOL_VECTORS: usize = 4;

/// Start barrier: every worker arrives once before entering its loop.
pub struct ReadyLatch {
    count: Mutex<usize>,
    all_ready: Condvar,
    expected: usize,
}

impl ReadyLatch {
    pub fn new(expected: usize) -> Self {
        Self {
            count: Mutex::new(0),
            all_ready: Condvar::new(),
            expected,
        }
    }

    pub fn arrive(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.all_ready.notify_all();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count < self.expected {
            count = self.all_ready.wait(count).unwrap();
        }
    }
}

/// The streaming detection pipeline: one mel worker, one embedding
/// worker, and one worker per configured keyword, connected by handoff
/// channels. The host thread feeds `process_audio` and finishes with
/// `stop`, which drains and joins every stage in order.
pub struct Pipeline {
    audio_channel: Arc<Handoff<f32>>,
    mel_channel: Arc<Handoff<f32>>,
    feature_channels: Vec<Arc<Handoff<f32>>>,

    mel_stage: Option<MelStage<MelModel>>,
    embedding_stage: Option<EmbeddingStage<EmbeddingModel>>,
    detector_stages: Vec<DetectorStage<KeywordModel>>,

    mel_worker: Option<JoinHandle<()>>,
    embedding_worker: Option<JoinHandle<()>>,
    detector_workers: Vec<JoinHandle<()>>,

    preprocessors: Vec<Box<dyn Preprocessor>>,
    pool: VectorPool,
    ready: Arc<ReadyLatch>,
    running: Arc<AtomicBool>,
    stopped: bool,
}

impl Pipeline {
    /// Load every model and wire the channels. Errors here bubble to the
    /// entry point and exit non-zero; nothing is spawned yet.
    pub fn new(config: &Config) -> Result<Self> {
        let frame_samples = config.frame_samples();

        let mel_model = MelModel::load(&config.mel_model_path, config.mel_scale)?;
        info!("loaded mel spectrogram model");
        let mel_stage = MelStage::new(mel_model, frame_samples);

        let embedding_model = EmbeddingModel::load(&config.embedding_model_path)?;
        info!("loaded speech embedding model");
        let max_batch_mels = config.step_frames * MELS_PER_CHUNK * NUM_MELS;
        let embedding_stage = EmbeddingStage::new(embedding_model, max_batch_mels);

        let sink = Arc::new(EventSink::stdout(
            config.output_mode,
            config.show_timestamp,
        ));

        let mut detector_stages = Vec::with_capacity(config.wake_words.len());
        let mut feature_channels = Vec::with_capacity(config.wake_words.len());
        for wake_word in &config.wake_words {
            let model = KeywordModel::load(&wake_word.model_path)?;
            let name = model.name().to_string();
            info!("loaded wake word model: {name}");
            detector_stages.push(DetectorStage::new(name, model, wake_word, Arc::clone(&sink)));
            feature_channels.push(Arc::new(Handoff::new()));
        }

        let mut preprocessors: Vec<Box<dyn Preprocessor>> = Vec::new();
        if config.enable_noise_suppression {
            preprocessors.push(Box::new(NoiseSuppressor::new()));
            info!("noise suppression enabled");
        }
        if config.enable_vad {
            let gate = VoiceGate::load(&config.vad_model_path, config.vad_threshold)?;
            info!("loaded VAD model");
            preprocessors.push(Box::new(gate));
        }

        debug!(
            "SIMD audio conversion: {}",
            if simd::is_simd_available() {
                "enabled"
            } else {
                "disabled"
            }
        );

        let expected_workers = 2 + detector_stages.len();
        Ok(Self {
            audio_channel: Arc::new(Handoff::new()),
            mel_channel: Arc::new(Handoff::new()),
            feature_channels,
            mel_stage: Some(mel_stage),
            embedding_stage: Some(embedding_stage),
            detector_stages,
            mel_worker: None,
            embedding_worker: None,
            detector_workers: Vec::new(),
            preprocessors,
            pool: VectorPool::new(AUDIO_POOL_VECTORS, frame_samples),
            ready: Arc::new(ReadyLatch::new(expected_workers)),
            running: Arc::new(AtomicBool::new(false)),
            stopped: false,
        })
    }

    /// Spawn the stage workers. Idempotent once started.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut stage) = self.mel_stage.take() {
            let input = Arc::clone(&self.audio_channel);
            let output = Arc::clone(&self.mel_channel);
            let ready = Arc::clone(&self.ready);
            self.mel_worker = Some(std::thread::spawn(move || {
                ready.arrive();
                if let Err(e) = stage.run(&input, &output) {
                    fatal_worker_error("mel", &e);
                }
            }));
        }

        if let Some(mut stage) = self.embedding_stage.take() {
            let input = Arc::clone(&self.mel_channel);
            let outputs: Vec<Arc<Handoff<f32>>> =
                self.feature_channels.iter().map(Arc::clone).collect();
            let ready = Arc::clone(&self.ready);
            self.embedding_worker = Some(std::thread::spawn(move || {
                ready.arrive();
                if let Err(e) = stage.run(&input, &outputs) {
                    fatal_worker_error("embedding", &e);
                }
            }));
        }

        for (mut stage, channel) in self
            .detector_stages
            .drain(..)
            .zip(self.feature_channels.iter().map(Arc::clone))
        {
            let ready = Arc::clone(&self.ready);
            self.detector_workers.push(std::thread::spawn(move || {
                ready.arrive();
                let name = stage.name().to_string();
                if let Err(e) = stage.run(&channel) {
                    fatal_worker_error(&name, &e);
                }
            }));
        }
    }

    /// Block until every worker has loaded and entered its loop.
    pub fn wait_until_ready(&self) {
        self.ready.wait();
        info!("pipeline ready");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared flag for the signal handler; clearing it makes the host
    /// read loop fall through to `stop`.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Convert one host frame and hand it to the mel worker. Pre-filters
    /// run on the int16 samples in place before conversion.
    pub fn process_audio(&mut self, samples: &mut [i16]) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        for preprocessor in &mut self.preprocessors {
            preprocessor.process(samples)?;
        }

        let mut scratch = self.pool.borrow();
        simd::convert_to_float(samples, &mut scratch);
        self.audio_channel.push(scratch.take());
        Ok(())
    }

    /// Cooperative shutdown: mark the audio channel exhausted, then join
    /// mel, embedding, and detector workers in order. Each stage
    /// propagates exhaustion downstream as it drains; residual data
    /// shorter than one window is discarded. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.running.store(false, Ordering::SeqCst);

        self.audio_channel.set_exhausted();
        if let Some(worker) = self.mel_worker.take() {
            let _ = worker.join();
        }

        self.mel_channel.set_exhausted();
        if let Some(worker) = self.embedding_worker.take() {
            let _ = worker.join();
        }

        for channel in &self.feature_channels {
            channel.set_exhausted();
        }
        for worker in self.detector_workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fatal_worker_error(stage: &str, error: &anyhow::Error) {
    error!("{stage} worker failed: {error:#}");
    std::process::exit(1);
}
